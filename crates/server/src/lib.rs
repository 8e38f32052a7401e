pub mod handlers;
pub mod responses;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use log::{info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use blog_core::{PipelineOrchestrator, ServerConfig};

pub use responses::{ApiError, ApiResponse, ErrorBody};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address `{0}`")]
    InvalidBind(String),
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared by every request. Runs get a child of `shutdown`, so stopping the
/// server cancels whatever is still in flight.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub sites: Arc<Vec<String>>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<PipelineOrchestrator>,
        sites: Vec<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            sites: Arc::new(sites),
            shutdown,
        }
    }
}

pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/api/posts", post(handlers::create_post))
        .route("/api/images", get(handlers::preview_image))
        .layer(cors_layer(allowed_origins))
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin `{origin}`");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Serves until `state.shutdown` is cancelled.
pub async fn serve(config: &ServerConfig, state: AppState) -> Result<(), ServerError> {
    let addr: SocketAddr = config
        .bind
        .parse()
        .map_err(|_| ServerError::InvalidBind(config.bind.clone()))?;
    let shutdown = state.shutdown.clone();
    let app = router(state, &config.allowed_origins);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("shutdown requested, draining connections");
        })
        .await?;
    Ok(())
}
