use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;
use crate::length::LengthCategory;

pub const DEFAULT_WRITING_STYLE: &str = "Professional, engaging, and informative";

/// Key of a configured publishing destination.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SiteId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Publish,
    Draft,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::Draft => "draft",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "publish" => Ok(Self::Publish),
            "draft" => Ok(Self::Draft),
            _ => Err(ConfigError::InvalidStatus(s.to_string())),
        }
    }
}

/// Input of one pipeline run. Never mutated once a run has started.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlogRequest {
    pub genre: String,
    pub length: LengthCategory,
    pub target_site: SiteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writing_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_status: Option<PostStatus>,
    /// Reusing the key from an earlier attempt lets the publisher find the
    /// post that attempt may already have created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl BlogRequest {
    pub fn new(
        genre: impl Into<String>,
        length: LengthCategory,
        target_site: impl Into<SiteId>,
    ) -> Self {
        Self {
            genre: genre.into(),
            length,
            target_site: target_site.into(),
            writing_style: None,
            post_status: None,
            idempotency_key: None,
        }
    }

    pub fn with_writing_style(mut self, style: impl Into<String>) -> Self {
        self.writing_style = Some(style.into());
        self
    }

    pub fn with_post_status(mut self, status: PostStatus) -> Self {
        self.post_status = Some(status);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn genre(&self) -> &str {
        self.genre.trim()
    }

    pub fn writing_style(&self) -> &str {
        self.writing_style
            .as_deref()
            .map(str::trim)
            .filter(|style| !style.is_empty())
            .unwrap_or(DEFAULT_WRITING_STYLE)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.genre().is_empty() {
            return Err(ConfigError::EmptyGenre);
        }
        if self.target_site.as_str().trim().is_empty() {
            return Err(ConfigError::Invalid("target_site must not be empty".to_string()));
        }
        if let Some(key) = &self.idempotency_key {
            let valid = !key.is_empty()
                && key.len() <= 64
                && key.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '-');
            if !valid {
                return Err(ConfigError::Invalid(
                    "idempotency_key must be 1-64 ASCII letters, digits or dashes".to_string(),
                ));
            }
        }
        Ok(())
    }
}
