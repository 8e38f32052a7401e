use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use super::{clean_model_output, Draft, LanguageModel, LanguageModelError, ModelRequest};
use crate::length::LengthPolicy;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::prompts::{
    PromptError, PromptRegistry, ADJUST_LENGTH, GENERATE_IDEAS, OUTLINE, SELECT_IDEA,
    WRITE_ARTICLE,
};
use crate::request::DEFAULT_WRITING_STYLE;

const IDEA_COUNT: usize = 3;
const PLAN_MAX_TOKENS: u32 = 600;

/// Leading list markers such as `1.`, `2)`, `-` or `*`.
static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s*").expect("list marker pattern"));

/// A bare choice such as `2`, `#2`, `Idea 2` or `2.`.
static CHOSEN_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:idea\s*)?#?\s*(\d+)\s*[.):]?$").expect("choice pattern")
});

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to render generation prompt: {0}")]
    Prompt(#[from] PromptError),
    #[error("language model failed while {step}: {source}")]
    Planning {
        step: &'static str,
        #[source]
        source: LanguageModelError,
    },
    #[error("language model failed while drafting: {0}")]
    Model(#[source] LanguageModelError),
    #[error("language model returned an empty draft")]
    EmptyResponse,
}

impl GenerationError {
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Prompt(_) => false,
            Self::Planning { source, .. } | Self::Model(source) => source.is_retriable(),
            Self::EmptyResponse => true,
        }
    }
}

/// Candidate ideas, the one picked, and the outline the draft follows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArticlePlan {
    pub ideas: Vec<String>,
    pub idea: String,
    pub outline: String,
}

/// Plans an article (ideas, selection, outline), then drafts it with one
/// generation call and at most one corrective call.
pub struct ArticleGenerator<'a> {
    model: &'a dyn LanguageModel,
    selector: &'a dyn LanguageModel,
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
}

impl<'a> ArticleGenerator<'a> {
    pub fn new(
        model: &'a dyn LanguageModel,
        prompts: &'a PromptRegistry,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            model,
            selector: model,
            prompts,
            sink,
        }
    }

    /// Uses `selector` instead of the drafting model to pick among ideas.
    pub fn with_selector(mut self, selector: &'a dyn LanguageModel) -> Self {
        self.selector = selector;
        self
    }

    pub async fn generate(
        &self,
        genre: &str,
        policy: &LengthPolicy,
    ) -> Result<Draft, GenerationError> {
        self.generate_with_style(genre, DEFAULT_WRITING_STYLE, policy).await
    }

    pub async fn generate_with_style(
        &self,
        genre: &str,
        writing_style: &str,
        policy: &LengthPolicy,
    ) -> Result<Draft, GenerationError> {
        let plan = self.plan(genre, policy).await?;
        self.write(genre, writing_style, &plan, policy).await
    }

    pub async fn plan(
        &self,
        genre: &str,
        policy: &LengthPolicy,
    ) -> Result<ArticlePlan, GenerationError> {
        let prompt = self
            .prompts
            .format_with(GENERATE_IDEAS, [("genre", genre)])?;
        let reply = self.ask(self.model, prompt, "suggesting ideas").await?;
        let mut ideas = parse_ideas(&reply);
        if ideas.is_empty() {
            self.log(LogLevel::Warn, "model suggested no ideas; writing on the genre itself");
            ideas.push(genre.trim().to_string());
        }

        let idea = if ideas.len() == 1 {
            ideas[0].clone()
        } else {
            let numbered = ideas
                .iter()
                .enumerate()
                .map(|(index, idea)| format!("{}. {idea}", index + 1))
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = self.prompts.format_with(
                SELECT_IDEA,
                [("genre", genre.to_string()), ("ideas", numbered)],
            )?;
            let reply = self.ask(self.selector, prompt, "selecting an idea").await?;
            pick_idea(&reply, &ideas)
        };
        self.log(LogLevel::Info, format!("writing \"{idea}\""));

        let prompt = self.prompts.format_with(
            OUTLINE,
            [
                ("genre", genre.to_string()),
                ("idea", idea.clone()),
                ("min_words", policy.min_words.to_string()),
                ("max_words", policy.max_words.to_string()),
                ("structure", policy.generation_hint.to_string()),
            ],
        )?;
        let mut outline = clean_model_output(&self.ask(self.model, prompt, "outlining").await?);
        if outline.is_empty() {
            self.log(LogLevel::Warn, "model returned an empty outline; using the length hint");
            outline = policy.generation_hint.to_string();
        }

        Ok(ArticlePlan {
            ideas,
            idea,
            outline,
        })
    }

    /// Drafts `plan` with one call, plus one corrective call when the draft is
    /// empty or outside the word band.
    pub async fn write(
        &self,
        genre: &str,
        writing_style: &str,
        plan: &ArticlePlan,
        policy: &LengthPolicy,
    ) -> Result<Draft, GenerationError> {
        let prompt = self.prompts.format_with(
            WRITE_ARTICLE,
            [
                ("genre", genre.to_string()),
                ("idea", plan.idea.clone()),
                ("outline", plan.outline.clone()),
                ("writing_style", writing_style.to_string()),
                ("min_words", policy.min_words.to_string()),
                ("max_words", policy.max_words.to_string()),
                ("target_words", policy.target_words().to_string()),
                ("structure", policy.generation_hint.to_string()),
            ],
        )?;
        let request = ModelRequest::new(prompt).with_max_tokens(policy.max_tokens());

        let first = self.call(&request).await?;
        if !first.is_empty() && policy.contains(first.word_count) {
            self.log(
                LogLevel::Info,
                format!("draft ready with {} words", first.word_count),
            );
            return Ok(first);
        }

        let corrective = if first.is_empty() {
            self.log(LogLevel::Warn, "model returned an empty draft, asking once more");
            request
        } else {
            self.log(
                LogLevel::Warn,
                format!(
                    "draft has {} words, outside {}..={}; requesting one correction",
                    first.word_count, policy.min_words, policy.max_words
                ),
            );
            let direction = if first.word_count < policy.min_words {
                "expand"
            } else {
                "shorten"
            };
            let prompt = self.prompts.format_with(
                ADJUST_LENGTH,
                [
                    ("genre", genre.to_string()),
                    ("draft", first.text.clone()),
                    ("word_count", first.word_count.to_string()),
                    ("min_words", policy.min_words.to_string()),
                    ("max_words", policy.max_words.to_string()),
                    ("target_words", policy.target_words().to_string()),
                    ("direction", direction.to_string()),
                ],
            )?;
            ModelRequest::new(prompt).with_max_tokens(policy.max_tokens())
        };

        let second = match self.call(&corrective).await {
            Ok(draft) => draft,
            Err(err) if !first.is_empty() => {
                self.log(
                    LogLevel::Warn,
                    format!("corrective call failed ({err}); keeping the first draft"),
                );
                first.clone()
            }
            Err(err) => return Err(err),
        };

        let draft = match (second.is_empty(), first.is_empty()) {
            (false, _) => second,
            (true, false) => first,
            (true, true) => return Err(GenerationError::EmptyResponse),
        };

        if !policy.contains(draft.word_count) {
            self.log(
                LogLevel::Warn,
                format!(
                    "draft still has {} words after correction; passing it to review",
                    draft.word_count
                ),
            );
        }
        Ok(draft)
    }

    async fn ask(
        &self,
        model: &dyn LanguageModel,
        prompt: String,
        step: &'static str,
    ) -> Result<String, GenerationError> {
        self.log(LogLevel::Debug, format!("{step} ({} chars)", prompt.len()));
        let request = ModelRequest::new(prompt).with_max_tokens(PLAN_MAX_TOKENS);
        model
            .invoke(&request)
            .await
            .map_err(|source| GenerationError::Planning { step, source })
    }

    async fn call(&self, request: &ModelRequest) -> Result<Draft, GenerationError> {
        self.log(
            LogLevel::Debug,
            format!("sending generation prompt ({} chars)", request.prompt.len()),
        );
        let response = self
            .model
            .invoke(request)
            .await
            .map_err(GenerationError::Model)?;
        Ok(Draft::new(clean_model_output(&response)))
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}

fn strip_list_marker(line: &str) -> String {
    let line = line.trim().trim_matches('*');
    LIST_MARKER
        .replace(line, "")
        .trim()
        .trim_matches(|c| c == '"' || c == '*')
        .trim()
        .to_string()
}

fn parse_ideas(reply: &str) -> Vec<String> {
    clean_model_output(reply)
        .lines()
        .filter(|line| !line.trim_end().ends_with(':'))
        .map(strip_list_marker)
        .filter(|idea| !idea.is_empty())
        .take(IDEA_COUNT)
        .collect()
}

/// Maps the selector's answer back onto one of `ideas`: a number picks by
/// position, a quoted idea picks itself, and anything else is taken verbatim.
fn pick_idea(reply: &str, ideas: &[String]) -> String {
    let cleaned = clean_model_output(reply);
    let first_line = cleaned
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    let by_number = CHOSEN_NUMBER
        .captures(first_line)
        .and_then(|caps| caps[1].parse::<usize>().ok())
        .and_then(|number| number.checked_sub(1))
        .and_then(|index| ideas.get(index));
    if let Some(idea) = by_number {
        return idea.clone();
    }
    if let Some(idea) = ideas.iter().find(|idea| cleaned.contains(idea.as_str())) {
        return idea.clone();
    }

    let verbatim = strip_list_marker(first_line);
    if verbatim.is_empty() {
        ideas.first().cloned().unwrap_or_default()
    } else {
        verbatim
    }
}
