mod generator;
mod reviewer;

pub use generator::{ArticleGenerator, ArticlePlan, GenerationError};
pub use reviewer::{ArticleReviewer, ReviewError};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;

use crate::length::count_words;

static TITLE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:#{1,6}\s*)?(?:\*\*)?title\s*:\s*(?:\*\*)?\s*(.+?)\s*(?:\*\*)?\s*$")
        .expect("title pattern")
});

static HEADING_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*#\s+(.+?)\s*#*\s*$").expect("heading pattern"));

/// One call to a language model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRequest {
    pub prompt: String,
    pub max_tokens: Option<u32>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug)]
pub struct LanguageModelError {
    inner: Box<dyn StdError + Send + Sync>,
    retriable: bool,
}

impl LanguageModelError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
            retriable: true,
        }
    }

    /// A failure that repeating the call cannot fix, such as rejected credentials.
    pub fn permanent<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
            retriable: false,
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            inner: message.into(),
            retriable: true,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retriable
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, request: &ModelRequest) -> Result<String, LanguageModelError>;
}

/// Unreviewed model output. `word_count` excludes a leading title line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub text: String,
    pub word_count: u32,
}

impl Draft {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let (_, body) = split_title(&text);
        let word_count = count_words(&body);
        Self { text, word_count }
    }

    pub fn is_empty(&self) -> bool {
        self.word_count == 0
    }
}

/// Reviewed article ready for publishing. `word_count` counts the body only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalArticle {
    title: String,
    body: String,
    word_count: u32,
}

impl FinalArticle {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let word_count = count_words(&body);
        Self {
            title: title.into(),
            body,
            word_count,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn word_count(&self) -> u32 {
        self.word_count
    }
}

/// Strips code fences and surrounding whitespace from a model reply.
pub fn clean_model_output(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Splits a leading `Title:` line or `# Heading` off the text. Returns the
/// title (if any) and the remaining body.
pub(crate) fn split_title(text: &str) -> (Option<String>, String) {
    let mut lines = text.lines();
    let first = loop {
        match lines.next() {
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => break line,
            None => return (None, String::new()),
        }
    };

    let title = TITLE_LINE
        .captures(first)
        .or_else(|| HEADING_LINE.captures(first))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_matches(|c| c == '"' || c == '*').trim().to_string())
        .filter(|title| !title.is_empty());

    match title {
        Some(title) => {
            let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
            (Some(title), body)
        }
        None => (None, text.trim().to_string()),
    }
}

/// Builds a title from the opening sentence when the model did not give one.
pub(crate) fn synthesize_title(body: &str, fallback: &str) -> String {
    let sentence = body
        .lines()
        .map(|line| line.trim_start_matches(['#', '-', '*', '>', ' ']))
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.split(['.', '!', '?']).next())
        .unwrap_or_default();

    let words: Vec<&str> = sentence.split_whitespace().take(10).collect();
    if words.is_empty() {
        return fallback.to_string();
    }
    words.join(" ")
}
