use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::logging::{LogLevel, LogRecord, LogSink};

/// One photo-search hit, in the provider's ranking order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoCandidate {
    pub url: String,
    pub photographer_name: String,
    pub photographer_profile_url: String,
}

#[derive(Debug)]
pub struct PhotoSearchError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl PhotoSearchError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            inner: message.into(),
        }
    }
}

impl fmt::Display for PhotoSearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for PhotoSearchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

#[async_trait]
pub trait PhotoSearch: Send + Sync {
    /// Returns candidates best-first; an empty list means no match.
    async fn search(&self, query: &str) -> Result<Vec<PhotoCandidate>, PhotoSearchError>;
}

/// A licensed photo plus the credit that must be shown next to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub url: String,
    pub photographer_name: String,
    pub photographer_profile_url: String,
    pub attribution_text: String,
}

impl ImageAsset {
    pub fn from_candidate(candidate: PhotoCandidate) -> Self {
        let attribution_text = format!(
            "Photo by {} on Unsplash ({})",
            candidate.photographer_name, candidate.photographer_profile_url
        );
        Self {
            url: candidate.url,
            photographer_name: candidate.photographer_name,
            photographer_profile_url: candidate.photographer_profile_url,
            attribution_text,
        }
    }
}

#[derive(Debug, Error)]
pub enum ImageSourcingError {
    #[error("no photos found for `{query}`")]
    NoResults { query: String },
    #[error("photo search failed: {0}")]
    Search(#[source] PhotoSearchError),
    #[error("photo results for `{query}` are missing `{field}`")]
    IncompleteResult { query: String, field: &'static str },
    #[error("photo search timed out after {0:?}")]
    Timeout(Duration),
}

pub struct ImageSourcer<'a> {
    photos: &'a dyn PhotoSearch,
    sink: &'a dyn LogSink,
}

impl<'a> ImageSourcer<'a> {
    pub fn new(photos: &'a dyn PhotoSearch, sink: &'a dyn LogSink) -> Self {
        Self { photos, sink }
    }

    /// Takes the highest-ranked candidate that carries a url, a name and a
    /// profile link.
    pub async fn source(&self, genre: &str) -> Result<ImageAsset, ImageSourcingError> {
        let query = genre.trim();
        let candidates = self
            .photos
            .search(query)
            .await
            .map_err(ImageSourcingError::Search)?;

        if candidates.is_empty() {
            return Err(ImageSourcingError::NoResults {
                query: query.to_string(),
            });
        }

        let mut missing = "url";
        for candidate in candidates {
            match missing_field(&candidate) {
                None => {
                    let asset = ImageAsset::from_candidate(candidate);
                    self.sink.log(LogRecord::new(
                        LogLevel::Info,
                        format!("selected photo by {}", asset.photographer_name),
                    ));
                    return Ok(asset);
                }
                Some(field) => missing = field,
            }
        }

        Err(ImageSourcingError::IncompleteResult {
            query: query.to_string(),
            field: missing,
        })
    }
}

fn missing_field(candidate: &PhotoCandidate) -> Option<&'static str> {
    if candidate.url.trim().is_empty() {
        Some("url")
    } else if candidate.photographer_name.trim().is_empty() {
        Some("photographer_name")
    } else if candidate.photographer_profile_url.trim().is_empty() {
        Some("photographer_profile_url")
    } else {
        None
    }
}
