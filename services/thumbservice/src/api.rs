use crate::config::ApiConfig;
use crate::error::ThumbnailError;
use crate::frame::{FrameRef, ThumbnailQuery};
use crate::pipeline::ThumbnailPipeline;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

const INDEX_TEXT: &str = "Please see the documentation for the thumbnail service at \
    <a href=\"https://developers.lco.global\">developers.lco.global</a>";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ThumbnailPipeline>,
}

/// Thumbnail response
#[derive(Debug, Serialize)]
pub struct ThumbnailResponse {
    /// Presigned URL of the JPEG
    pub url: String,
    /// Proposal of the source frame
    pub propid: Option<String>,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/:frame", get(get_thumbnail))
        .route("/:frame/", get(get_thumbnail))
        .fallback(index)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Landing page, also served for unknown paths
async fn index() -> &'static str {
    INDEX_TEXT
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "thumbservice"
    }))
}

/// Thumbnail for a frame addressed by numeric ID or basename
#[instrument(skip(state, headers))]
async fn get_thumbnail(
    State(state): State<AppState>,
    Path(frame): Path<String>,
    query: std::result::Result<Query<ThumbnailQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    metrics::counter!("thumbnail_requests_total").increment(1);

    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let result = async {
        let Query(query) = query.map_err(|e| ThumbnailError::ValidationFailed(e.body_text()))?;
        let params = query.params()?;
        let wants_image = query.wants_image()?;
        let frame = state.pipeline.lookup(&FrameRef::parse(&frame), auth).await?;
        let thumbnail = state.pipeline.thumbnail(&frame, &params, auth).await?;
        Ok::<_, ThumbnailError>((thumbnail, wants_image))
    };

    match result.await {
        Ok((thumbnail, true)) => redirect(&thumbnail.url),
        Ok((thumbnail, false)) => Json(ThumbnailResponse {
            url: thumbnail.url,
            propid: thumbnail.propid,
        })
        .into_response(),
        Err(e) => {
            log_failure(&e);
            metrics::counter!("thumbnail_failures_total", "code" => e.code()).increment(1);
            e.into_response()
        }
    }
}

fn redirect(url: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
}

fn log_failure(e: &ThumbnailError) {
    if e.status().is_server_error() {
        error!(code = e.code(), error = %e, "Thumbnail request failed");
    } else {
        warn!(code = e.code(), error = %e, "Thumbnail request rejected");
    }
}

/// Start the thumbnail API server, stopping when `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting thumbnail API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
