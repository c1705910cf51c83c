//! Error taxonomy shared by every stage of the thumbnail pipeline.
//!
//! Whatever fails underneath (archive transport, codec, object store), callers
//! see a single [`ThumbnailError`] with a stable code, an HTTP status and an
//! optional structured payload.

use crate::conversion::ConversionError;
use crate::object_store::StorageError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors surfaced to callers of the thumbnail pipeline
#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("{0}")]
    ValidationFailed(String),

    #[error("RVB frames not found")]
    RvbFramesNotFound,

    #[error("{0}")]
    UpstreamNotFound(String),

    #[error("{0}")]
    UpstreamUnavailable(String),

    #[error("{message}")]
    UpstreamClientError {
        status: u16,
        message: String,
        payload: Map<String, Value>,
    },

    #[error("Conversion failed: {0}")]
    ConversionFailed(#[from] ConversionError),

    #[error("Object store error: {0}")]
    StorageFailed(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ThumbnailError>;

impl ThumbnailError {
    /// Machine readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::RvbFramesNotFound => "RVB_FRAMES_NOT_FOUND",
            Self::UpstreamNotFound(_) => "UPSTREAM_NOT_FOUND",
            Self::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Self::UpstreamClientError { .. } => "UPSTREAM_CLIENT_ERROR",
            Self::ConversionFailed(_) => "CONVERSION_FAILED",
            Self::StorageFailed(_) => "STORAGE_FAILED",
            Self::Io(_) => "IO_FAILED",
        }
    }

    /// HTTP status returned to the client
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::RvbFramesNotFound | Self::UpstreamNotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable(_) | Self::StorageFailed(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamClientError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::ConversionFailed(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body: `message` plus any payload forwarded from upstream
    pub fn body(&self) -> Value {
        let mut body = Map::new();
        if let Self::UpstreamClientError { payload, .. } = self {
            body.extend(payload.clone());
        }
        body.insert("message".to_string(), Value::String(self.to_string()));
        Value::Object(body)
    }
}

impl IntoResponse for ThumbnailError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
