use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulldown_cmark::{html, Options, Parser};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::article::FinalArticle;
use crate::image::ImageAsset;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::request::{PostStatus, SiteId};

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Identifies one logical post across publish retries.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Reuses a caller-supplied key, normalised to lower case.
    pub fn from_key(key: &str) -> Self {
        Self(key.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResult {
    pub post_id: String,
    pub post_url: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub url: String,
    pub alt_text: String,
    pub photographer_name: String,
    pub photographer_profile_url: String,
}

impl ImageReference {
    pub fn from_asset(asset: &ImageAsset) -> Self {
        Self {
            url: asset.url.clone(),
            alt_text: format!("{} by {}", asset.url, asset.photographer_name),
            photographer_name: asset.photographer_name.clone(),
            photographer_profile_url: asset.photographer_profile_url.clone(),
        }
    }
}

/// Everything the content backend needs to create one post.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostSubmission {
    pub title: String,
    pub content_html: String,
    pub status: Option<PostStatus>,
    pub featured_image: Option<ImageReference>,
    pub token: IdempotencyToken,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPost {
    pub post_id: String,
    pub post_url: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("credentials rejected: {0}")]
    Authentication(#[source] BoxError),
    #[error("temporary failure: {0}")]
    Transient(#[source] BoxError),
    /// The request was sent but no answer came back, so the write may have
    /// been applied.
    #[error("no response after sending: {0}")]
    Unconfirmed(#[source] BoxError),
    #[error("request rejected: {0}")]
    Rejected(#[source] BoxError),
}

impl ContentError {
    pub fn authentication(error: impl Into<BoxError>) -> Self {
        Self::Authentication(error.into())
    }

    pub fn transient(error: impl Into<BoxError>) -> Self {
        Self::Transient(error.into())
    }

    pub fn unconfirmed(error: impl Into<BoxError>) -> Self {
        Self::Unconfirmed(error.into())
    }

    pub fn rejected(error: impl Into<BoxError>) -> Self {
        Self::Rejected(error.into())
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Unconfirmed(_))
    }
}

/// Write access to a content-management backend.
#[async_trait]
pub trait ContentManagement: Send + Sync {
    fn has_site(&self, site: &SiteId) -> bool;

    /// Looks up a post created earlier with the same token.
    async fn find_by_token(
        &self,
        site: &SiteId,
        token: &IdempotencyToken,
    ) -> Result<Option<CreatedPost>, ContentError>;

    async fn create_post(
        &self,
        site: &SiteId,
        submission: &PostSubmission,
    ) -> Result<CreatedPost, ContentError>;
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("site `{0}` is not configured")]
    UnknownSite(SiteId),
    #[error("looking up an earlier post on `{site}` failed: {source}")]
    Lookup {
        site: SiteId,
        #[source]
        source: ContentError,
    },
    #[error("creating the post on `{site}` failed: {source}")]
    Create {
        site: SiteId,
        #[source]
        source: ContentError,
    },
}

impl PublishError {
    fn content(&self) -> Option<&ContentError> {
        match self {
            Self::UnknownSite(_) => None,
            Self::Lookup { source, .. } | Self::Create { source, .. } => Some(source),
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.content().is_some_and(ContentError::is_retriable)
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self.content(), Some(ContentError::Authentication(_)))
    }

    /// True when a create request went out and its result is unknown.
    pub fn may_have_created(&self) -> bool {
        matches!(
            self,
            Self::Create {
                source: ContentError::Unconfirmed(_),
                ..
            }
        )
    }
}

pub struct Publisher<'a> {
    cms: &'a dyn ContentManagement,
    sink: &'a dyn LogSink,
}

impl<'a> Publisher<'a> {
    pub fn new(cms: &'a dyn ContentManagement, sink: &'a dyn LogSink) -> Self {
        Self { cms, sink }
    }

    /// Creates the post unless one with `token` already exists on `site`, in
    /// which case that post is returned.
    pub async fn publish(
        &self,
        article: &FinalArticle,
        image: Option<&ImageAsset>,
        site: &SiteId,
        token: &IdempotencyToken,
        status: Option<PostStatus>,
    ) -> Result<PublishResult, PublishError> {
        if !self.cms.has_site(site) {
            return Err(PublishError::UnknownSite(site.clone()));
        }
        if let Some(existing) = self
            .cms
            .find_by_token(site, token)
            .await
            .map_err(|source| PublishError::Lookup {
                site: site.clone(),
                source,
            })?
        {
            self.log(
                LogLevel::Info,
                format!(
                    "post {} already exists for token {token}; not creating another",
                    existing.post_id
                ),
            );
            return Ok(into_result(existing));
        }

        let submission = PostSubmission {
            title: article.title().to_string(),
            content_html: render_content(article, image),
            status,
            featured_image: image.map(ImageReference::from_asset),
            token: token.clone(),
        };
        let created = self
            .cms
            .create_post(site, &submission)
            .await
            .map_err(|source| PublishError::Create {
                site: site.clone(),
                source,
            })?;
        self.log(
            LogLevel::Info,
            format!("created post {} at {}", created.post_id, created.post_url),
        );
        Ok(into_result(created))
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}

fn into_result(post: CreatedPost) -> PublishResult {
    PublishResult {
        post_id: post.post_id,
        post_url: post.post_url,
        published_at: post.published_at.unwrap_or_else(Utc::now),
    }
}

/// Renders the post HTML: the image block (when present) above the body,
/// with its credit directly underneath.
pub fn render_content(article: &FinalArticle, image: Option<&ImageAsset>) -> String {
    let mut output = String::new();

    if let Some(image) = image {
        output.push_str(&format!(
            "<figure class=\"wp-block-image size-large\"><img src=\"{}\" alt=\"{}\"/>\
             <figcaption><a href=\"{}\" rel=\"noopener\">{}</a></figcaption></figure>\n",
            escape_html(&image.url),
            escape_html(&format!("{} by {}", article.title(), image.photographer_name)),
            escape_html(&image.photographer_profile_url),
            escape_html(&image.attribution_text),
        ));
    }

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    html::push_html(&mut output, Parser::new_ext(article.body(), options));
    output
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
