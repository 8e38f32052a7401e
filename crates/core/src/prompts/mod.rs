use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::PromptConfig;

const BUILT_IN_PROMPTS: &str = include_str!("../../prompts/default.toml");

pub const GENERATE_IDEAS: &str = "generate_ideas";
pub const SELECT_IDEA: &str = "select_idea";
pub const OUTLINE: &str = "outline";
pub const WRITE_ARTICLE: &str = "write_article";
pub const ADJUST_LENGTH: &str = "adjust_length";
pub const REVIEW_ARTICLE: &str = "review_article";

/// `{{` and `}}` are literal braces; `{ name }` is a placeholder.
static TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{|\}\}|\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").expect("placeholder pattern")
});

pub type PromptArguments = HashMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromptSource {
    BuiltIn,
    File(PathBuf),
}

impl PromptSource {
    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::BuiltIn)
    }
}

#[derive(Clone, Debug)]
enum Segment {
    Text(String),
    Slot(String),
}

#[derive(Clone, Debug)]
pub struct PromptTemplate {
    key: String,
    description: Option<String>,
    source: PromptSource,
    segments: Vec<Segment>,
    placeholders: BTreeSet<String>,
}

impl PromptTemplate {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn source(&self) -> &PromptSource {
        &self.source
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.placeholders.iter().map(String::as_str)
    }

    pub fn render(&self, arguments: &PromptArguments) -> Result<String, PromptError> {
        if let Some(missing) = self
            .placeholders
            .iter()
            .find(|name| !arguments.contains_key(*name))
        {
            return Err(PromptError::MissingArgument {
                key: self.key.clone(),
                argument: missing.clone(),
            });
        }

        let mut output = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => output.push_str(text),
                Segment::Slot(name) => output.push_str(&arguments[name]),
            }
        }
        Ok(output)
    }

    fn parse(key: String, raw: RawPrompt, source: PromptSource) -> Self {
        let mut segments = Vec::new();
        let mut placeholders = BTreeSet::new();
        let mut text = String::new();
        let mut cursor = 0;

        for captures in TOKEN.captures_iter(&raw.template) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            text.push_str(&raw.template[cursor..whole.start()]);
            cursor = whole.end();
            match captures.get(1) {
                Some(name) => {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    placeholders.insert(name.as_str().to_string());
                    segments.push(Segment::Slot(name.as_str().to_string()));
                }
                None => text.push_str(&whole.as_str()[..1]),
            }
        }
        text.push_str(&raw.template[cursor..]);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Self {
            key,
            description: raw.description,
            source,
            segments,
            placeholders,
        }
    }
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt `{0}` not found")]
    NotFound(String),
    #[error("missing argument `{argument}` when rendering prompt `{key}`")]
    MissingArgument { key: String, argument: String },
    #[error("failed to read prompt file `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse built-in prompts: {0}")]
    ParseBuiltIn(toml::de::Error),
    #[error("failed to parse prompt file `{path}`: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Named prompt templates. Built-ins ship with the crate; TOML files in the
/// custom directories override them key by key.
#[derive(Debug)]
pub struct PromptRegistry {
    prompts: BTreeMap<String, PromptTemplate>,
    directories: Vec<PathBuf>,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, PromptError> {
        Self::from_prompt_config(&PromptConfig::default())
    }

    pub fn from_prompt_config(config: &PromptConfig) -> Result<Self, PromptError> {
        Self::with_custom_directories(&config.custom_directories)
    }

    pub fn with_custom_directories<P: AsRef<Path>>(directories: &[P]) -> Result<Self, PromptError> {
        let mut registry = Self {
            prompts: BTreeMap::new(),
            directories: directories
                .iter()
                .map(|dir| dir.as_ref().to_path_buf())
                .collect(),
        };
        registry.reload()?;
        Ok(registry)
    }

    pub fn reload(&mut self) -> Result<(), PromptError> {
        let mut prompts = BTreeMap::new();
        let document: PromptDocument =
            toml::from_str(BUILT_IN_PROMPTS).map_err(PromptError::ParseBuiltIn)?;
        insert_all(&mut prompts, document, PromptSource::BuiltIn);

        for dir in &self.directories {
            for path in toml_files(dir)? {
                let contents = fs::read_to_string(&path).map_err(|source| PromptError::Io {
                    path: path.clone(),
                    source,
                })?;
                let document: PromptDocument =
                    toml::from_str(&contents).map_err(|source| PromptError::ParseFile {
                        path: path.clone(),
                        source,
                    })?;
                insert_all(&mut prompts, document, PromptSource::File(path));
            }
        }

        self.prompts = prompts;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&PromptTemplate> {
        self.prompts.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(String::as_str)
    }

    pub fn format(&self, key: &str, args: &PromptArguments) -> Result<String, PromptError> {
        self.get(key)
            .ok_or_else(|| PromptError::NotFound(key.to_string()))?
            .render(args)
    }

    pub fn format_with<I, K, V>(&self, key: &str, arguments: I) -> Result<String, PromptError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let args = arguments
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<PromptArguments>();
        self.format(key, &args)
    }
}

fn insert_all(
    prompts: &mut BTreeMap<String, PromptTemplate>,
    document: PromptDocument,
    source: PromptSource,
) {
    for (key, raw) in document.prompts {
        let template = PromptTemplate::parse(key.clone(), raw, source.clone());
        prompts.insert(key, template);
    }
}

fn toml_files(dir: &Path) -> Result<Vec<PathBuf>, PromptError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let io_error = |source| PromptError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if path.is_file() && is_toml {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Deserialize)]
struct PromptDocument {
    #[serde(default)]
    prompts: BTreeMap<String, RawPrompt>,
}

#[derive(Debug, Deserialize)]
struct RawPrompt {
    template: String,
    #[serde(default)]
    description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn built_in_prompts_are_present() {
        let registry = PromptRegistry::new().unwrap();
        for key in [
            GENERATE_IDEAS,
            SELECT_IDEA,
            OUTLINE,
            WRITE_ARTICLE,
            ADJUST_LENGTH,
            REVIEW_ARTICLE,
        ] {
            let template = registry.get(key).unwrap();
            assert!(template.source().is_builtin());
        }
    }

    #[test]
    fn renders_write_prompt() {
        let registry = PromptRegistry::new().unwrap();
        let output = registry
            .format_with(
                WRITE_ARTICLE,
                [
                    ("genre", "hiking"),
                    ("idea", "Ridge Walks for Beginners"),
                    ("outline", "## Gear"),
                    ("writing_style", "friendly"),
                    ("min_words", "300"),
                    ("max_words", "500"),
                    ("target_words", "400"),
                    ("structure", "short"),
                ],
            )
            .unwrap();
        assert!(output.contains("hiking"));
        assert!(output.contains("Ridge Walks for Beginners"));
        assert!(output.contains("300"));
        assert!(!output.contains("{genre}"));
    }

    #[test]
    fn missing_argument_fails() {
        let registry = PromptRegistry::new().unwrap();
        let error = registry
            .format_with(WRITE_ARTICLE, [("genre", "hiking")])
            .unwrap_err();
        assert!(matches!(error, PromptError::MissingArgument { .. }));
    }

    #[test]
    fn escaped_braces_stay_literal() {
        let template = PromptTemplate::parse(
            "t".into(),
            RawPrompt {
                template: "{{\"title\": \"{ name }\"}}".into(),
                description: None,
            },
            PromptSource::BuiltIn,
        );
        assert_eq!(template.placeholders().collect::<Vec<_>>(), vec!["name"]);
        let output = template
            .render(&PromptArguments::from([("name".into(), "x".into())]))
            .unwrap();
        assert_eq!(output, "{\"title\": \"x\"}");
    }

    #[test]
    fn custom_directory_overrides_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[prompts.review_article]\ntemplate = \"first {draft}\"\n").unwrap();

        let mut registry = PromptRegistry::with_custom_directories(&[dir.path()]).unwrap();
        let args = PromptArguments::from([("draft".into(), "body".into())]);
        assert_eq!(registry.format(REVIEW_ARTICLE, &args).unwrap(), "first body");

        fs::write(&path, "[prompts.review_article]\ntemplate = \"second {draft}\"\n").unwrap();
        registry.reload().unwrap();
        assert_eq!(registry.format(REVIEW_ARTICLE, &args).unwrap(), "second body");
        assert!(registry.get(WRITE_ARTICLE).unwrap().source().is_builtin());
    }

    #[test]
    fn unknown_prompt_is_not_found() {
        let registry = PromptRegistry::new().unwrap();
        assert!(matches!(
            registry.format("nope", &PromptArguments::new()),
            Err(PromptError::NotFound(_))
        ));
    }
}
