use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::{PipelineSettings, RetryPolicy};
use crate::request::PostStatus;

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_llm_timeout() -> u64 {
    180
}

fn default_unsplash_base_url() -> String {
    "https://api.unsplash.com".to_string()
}

fn default_orientation() -> String {
    "landscape".to_string()
}

fn default_app_name() -> String {
    "blog_pipeline".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_percent() -> u8 {
    20
}

fn default_call_timeout_secs() -> u64 {
    180
}

fn default_image_timeout_secs() -> u64 {
    20
}

fn default_publish_timeout_secs() -> u64 {
    60
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://127.0.0.1:3000".to_string(),
    ]
}

/// Invalid configuration or invalid run input. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown length category `{0}` (expected short, medium or long)")]
    InvalidLength(String),
    #[error("unknown post status `{0}` (expected publish or draft)")]
    InvalidStatus(String),
    #[error("genre must not be empty")]
    EmptyGenre,
    #[error("site `{0}` is not configured")]
    UnknownSite(String),
    #[error("no {section} profile named `{name}`")]
    MissingProfile { section: &'static str, name: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub interface_format: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            interface_format: String::new(),
            model_name: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout: default_llm_timeout(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UnsplashConfig {
    #[serde(default)]
    pub access_key: String,
    #[serde(default = "default_unsplash_base_url")]
    pub base_url: String,
    #[serde(default = "default_orientation")]
    pub orientation: String,
    /// Sent as `utm_source` on attribution links, as the Unsplash guidelines require.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,
}

impl Default for UnsplashConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            base_url: default_unsplash_base_url(),
            orientation: default_orientation(),
            app_name: default_app_name(),
            timeout: default_http_timeout(),
        }
    }
}

/// A WordPress site reachable through its REST API.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SiteConfig {
    /// REST root, e.g. `https://example.com/wp-json/wp/v2`.
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub app_password: String,
    #[serde(default)]
    pub default_status: PostStatus,
    #[serde(default = "default_http_timeout")]
    pub timeout: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// LLM profile used for drafting; falls back to the first profile.
    #[serde(default)]
    pub llm_interface: Option<String>,
    /// LLM profile used for review; falls back to `llm_interface`.
    #[serde(default)]
    pub review_interface: Option<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: u8,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm_interface: None,
            review_interface: None,
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_percent: default_jitter_percent(),
            call_timeout_secs: default_call_timeout_secs(),
            image_timeout_secs: default_image_timeout_secs(),
            publish_timeout_secs: default_publish_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            retry: RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
                .with_max_delay(Duration::from_millis(self.max_delay_ms))
                .with_jitter_percent(self.jitter_percent),
            call_timeout: Duration::from_secs(self.call_timeout_secs.max(1)),
            image_timeout: Duration::from_secs(self.image_timeout_secs.max(1)),
            publish_timeout: Duration::from_secs(self.publish_timeout_secs.max(1)),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    #[serde(default)]
    pub custom_directories: Vec<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RecentUsage {
    #[serde(default)]
    pub last_llm_interface: Option<String>,
    #[serde(default)]
    pub last_site: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm_profiles: BTreeMap<String, LlmConfig>,
    #[serde(default)]
    pub unsplash: UnsplashConfig,
    #[serde(default)]
    pub sites: BTreeMap<String, SiteConfig>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub prompts: PromptConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub recent: RecentUsage,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_llm_profile(&self, name: &str) -> Option<&LlmConfig> {
        self.llm_profiles.get(name)
    }

    pub fn upsert_llm_profile<S: Into<String>>(&mut self, name: S, profile: LlmConfig) {
        self.llm_profiles.insert(name.into(), profile);
    }

    pub fn primary_llm_profile(&self) -> Option<(&String, &LlmConfig)> {
        self.llm_profiles.iter().next()
    }

    pub fn get_site(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.get(name)
    }

    pub fn upsert_site<S: Into<String>>(&mut self, name: S, site: SiteConfig) {
        self.sites.insert(name.into(), site);
    }

    /// Profile name used for drafting articles.
    pub fn writer_interface(&self) -> Result<&str, ConfigError> {
        match self.pipeline.llm_interface.as_deref() {
            Some(name) => self.require_llm(name),
            None => self
                .primary_llm_profile()
                .map(|(name, _)| name.as_str())
                .ok_or_else(|| ConfigError::Invalid("no llm_profiles configured".to_string())),
        }
    }

    /// Profile name used for reviewing drafts.
    pub fn reviewer_interface(&self) -> Result<&str, ConfigError> {
        match self.pipeline.review_interface.as_deref() {
            Some(name) => self.require_llm(name),
            None => self.writer_interface(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.writer_interface()?;
        self.reviewer_interface()?;
        if self.sites.is_empty() {
            return Err(ConfigError::Invalid("no sites configured".to_string()));
        }
        if self.pipeline.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.max_attempts must be at least 1".to_string(),
            ));
        }
        for (name, site) in &self.sites {
            if site.base_url.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "site `{name}` has an empty base_url"
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(input)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    fn require_llm<'a>(&'a self, name: &'a str) -> Result<&'a str, ConfigError> {
        if self.llm_profiles.contains_key(name) {
            Ok(name)
        } else {
            Err(ConfigError::MissingProfile {
                section: "llm",
                name: name.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = if path.exists() {
            Config::from_path(&path)?
        } else {
            Config::default()
        };

        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.config.to_path(&self.path)
    }

    pub fn touch_llm_interface<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_llm_interface = Some(name.into());
    }

    pub fn touch_site<S: Into<String>>(&mut self, name: S) {
        self.config.recent.last_site = Some(name.into());
    }

    pub fn last_llm_interface(&self) -> Option<&str> {
        self.config
            .recent
            .last_llm_interface
            .as_deref()
            .filter(|name| self.config.llm_profiles.contains_key(*name))
    }

    pub fn last_site(&self) -> Option<&str> {
        self.config
            .recent
            .last_site
            .as_deref()
            .filter(|name| self.config.sites.contains_key(*name))
    }

    pub fn ensure_recent_defaults(&mut self) {
        if self.last_llm_interface().is_none() {
            self.config.recent.last_llm_interface = self.config.llm_profiles.keys().next().cloned();
        }
        if self.last_site().is_none() {
            self.config.recent.last_site = self.config.sites.keys().next().cloned();
        }
    }
}
