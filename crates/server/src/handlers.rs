use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use log::info;
use serde::Deserialize;
use serde_json::json;

use blog_core::{BlogPost, BlogRequest, ImageAsset, LengthCategory, PipelineError, PostStatus};

use crate::responses::{ApiError, ApiResponse};
use crate::AppState;

pub async fn root() -> impl IntoResponse {
    Json(json!({ "message": "Blog pipeline API is running" }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sites": state.sites.as_ref(),
    }))
}

/// Body of `POST /api/posts`. Length and status arrive as plain strings so
/// that bad values are reported as config errors rather than rejected by
/// the JSON extractor.
#[derive(Debug, Deserialize)]
pub struct CreatePostBody {
    pub genre: String,
    pub length: String,
    pub target_site: String,
    #[serde(default)]
    pub writing_style: Option<String>,
    #[serde(default)]
    pub post_status: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl CreatePostBody {
    pub fn into_request(self) -> Result<BlogRequest, PipelineError> {
        let length: LengthCategory = self.length.parse()?;
        let mut request = BlogRequest::new(self.genre, length, self.target_site);
        if let Some(style) = self.writing_style.filter(|s| !s.trim().is_empty()) {
            request = request.with_writing_style(style);
        }
        if let Some(status) = self.post_status {
            request = request.with_post_status(status.parse::<PostStatus>()?);
        }
        if let Some(key) = self.idempotency_key.filter(|k| !k.trim().is_empty()) {
            request = request.with_idempotency_key(key);
        }
        Ok(request)
    }
}

pub async fn create_post(
    State(state): State<AppState>,
    payload: Result<Json<CreatePostBody>, JsonRejection>,
) -> Result<ApiResponse<BlogPost>, ApiError> {
    let Json(body) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let request = body.into_request()?;
    info!(
        "POST /api/posts genre=\"{}\" length={} site={}",
        request.genre(),
        request.length,
        request.target_site
    );

    // Detached from the connection: a client hanging up drops this handler,
    // not the run. Only server shutdown cancels it.
    let cancel = state.shutdown.child_token();
    let orchestrator = state.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run(request, &cancel).await });
    let post = run
        .await
        .map_err(|err| ApiError::Internal(format!("pipeline task failed: {err}")))??;
    Ok(ApiResponse::success(post))
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    #[serde(default)]
    pub genre: String,
}

pub async fn preview_image(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> Result<ApiResponse<ImageAsset>, ApiError> {
    let genre = query.genre.trim();
    if genre.is_empty() {
        return Err(ApiError::BadRequest("genre must not be empty".to_string()));
    }
    let image = state.orchestrator.preview_image(genre).await?;
    Ok(ApiResponse::success(image))
}
