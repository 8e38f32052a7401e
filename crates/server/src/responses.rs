use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use blog_core::{ImageSourcingError, PipelineError, Stage};

/// Envelope for every successful JSON body.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
            timestamp: Utc::now(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Error body. `token` is only present for ambiguous publishes.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Image(#[from] ImageSourcingError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Pipeline(PipelineError::Config(_)) => StatusCode::BAD_REQUEST,
            Self::Pipeline(PipelineError::StageFailed { .. }) => StatusCode::BAD_GATEWAY,
            Self::Pipeline(PipelineError::AmbiguousOutcome { .. }) => StatusCode::CONFLICT,
            Self::Pipeline(PipelineError::Cancelled { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Image(ImageSourcingError::NoResults { .. })
            | Self::Image(ImageSourcingError::IncompleteResult { .. }) => StatusCode::NOT_FOUND,
            Self::Image(ImageSourcingError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Image(ImageSourcingError::Search(_)) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        let (stage, kind, token) = match self {
            Self::Pipeline(err) => (
                Some(err.stage()),
                err.kind(),
                err.token().map(|token| token.to_string()),
            ),
            Self::Image(err) => (Some(Stage::SourcingImage), image_kind(err), None),
            Self::BadRequest(_) => (None, "config", None),
            Self::Internal(_) => (None, "internal", None),
        };
        ErrorBody {
            success: false,
            error: self.to_string(),
            stage,
            kind,
            token,
            timestamp: Utc::now(),
        }
    }
}

fn image_kind(err: &ImageSourcingError) -> &'static str {
    match err {
        ImageSourcingError::NoResults { .. } => "no_results",
        ImageSourcingError::IncompleteResult { .. } => "incomplete_result",
        ImageSourcingError::Search(_) => "search",
        ImageSourcingError::Timeout(_) => "timeout",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
