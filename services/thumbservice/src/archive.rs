//! Client for the frame archive API.
//!
//! Every failure is normalised into [`ThumbnailError`] by [`map_status`] and
//! [`map_transport`], so callers never see transport-specific errors:
//!
//! | Upstream                                   | Result                  |
//! |--------------------------------------------|-------------------------|
//! | 404, or `{"detail": "Not found."}`         | `UPSTREAM_NOT_FOUND`    |
//! | 5xx, timeout, connection failure, bad body | `UPSTREAM_UNAVAILABLE`  |
//! | other 4xx                                  | `UPSTREAM_CLIENT_ERROR` |

use crate::config::ArchiveConfig;
use crate::error::{Result, ThumbnailError};
use crate::frame::FrameDescriptor;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

/// Read access to frames in the archive
#[async_trait]
pub trait FrameArchive: Send + Sync {
    /// `GET frames/{id}/`
    async fn frame(&self, id: i64, auth: Option<&str>) -> Result<FrameDescriptor>;

    /// `GET frames/?basename=...`; exactly one match is required
    async fn frame_by_basename(&self, basename: &str, auth: Option<&str>) -> Result<FrameDescriptor>;

    /// `GET frames/?request_id=...&reduction_level=...`
    async fn frames_for_request(
        &self,
        request_id: i64,
        reduction_level: i64,
        auth: Option<&str>,
    ) -> Result<Vec<FrameDescriptor>>;

    /// Download the raw frame to `dest`
    async fn download(&self, frame: &FrameDescriptor, dest: &Path) -> Result<()>;
}

/// Paginated list response of the archive
#[derive(Debug, Deserialize)]
struct FrameList {
    count: Option<u64>,
    #[serde(default)]
    results: Vec<FrameDescriptor>,
}

/// HTTP client for the archive API
pub struct ArchiveClient {
    client: Client,
    base_url: String,
}

impl ArchiveClient {
    /// Create a new archive client; every call is bounded by the configured timeout
    pub fn new(config: &ArchiveConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ThumbnailError::UpstreamUnavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_url.clone(),
        })
    }

    fn get(&self, path: &str, auth: Option<&str>) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match auth {
            Some(value) => request.header(AUTHORIZATION, value),
            None => request,
        }
    }

    async fn send(request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(map_transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.bytes().await.unwrap_or_default();
        Err(map_status(status, &body))
    }

    async fn json<T: serde::de::DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = Self::send(request).await?;
        let body = response.bytes().await.map_err(map_transport)?;
        if is_not_found_marker(&body) {
            return Err(ThumbnailError::UpstreamNotFound("Frame not found".to_string()));
        }
        serde_json::from_slice(&body).map_err(|e| {
            warn!(error = %e, "Archive returned an unexpected body");
            ThumbnailError::UpstreamUnavailable("Archive returned an unexpected response".to_string())
        })
    }
}

#[async_trait]
impl FrameArchive for ArchiveClient {
    #[instrument(skip(self, auth))]
    async fn frame(&self, id: i64, auth: Option<&str>) -> Result<FrameDescriptor> {
        Self::json(self.get(&format!("frames/{id}/"), auth)).await
    }

    #[instrument(skip(self, auth))]
    async fn frame_by_basename(&self, basename: &str, auth: Option<&str>) -> Result<FrameDescriptor> {
        let request = self.get("frames/", auth).query(&[("basename", basename)]);
        let list: FrameList = Self::json(request).await?;

        let count = list.count.unwrap_or(list.results.len() as u64);
        let mut results = list.results;
        match (count, results.pop()) {
            (1, Some(frame)) if results.is_empty() => Ok(frame),
            _ => {
                debug!(count, "Basename did not match exactly one frame");
                Err(ThumbnailError::UpstreamNotFound("Frame not found".to_string()))
            }
        }
    }

    #[instrument(skip(self, auth))]
    async fn frames_for_request(
        &self,
        request_id: i64,
        reduction_level: i64,
        auth: Option<&str>,
    ) -> Result<Vec<FrameDescriptor>> {
        let request = self.get("frames/", auth).query(&[
            ("request_id", request_id.to_string()),
            ("reduction_level", reduction_level.to_string()),
        ]);
        let list: FrameList = Self::json(request).await?;
        Ok(list.results)
    }

    #[instrument(skip(self, frame), fields(frame_id = frame.id))]
    async fn download(&self, frame: &FrameDescriptor, dest: &Path) -> Result<()> {
        let url = frame.url.as_deref().ok_or_else(|| {
            ThumbnailError::UpstreamNotFound(format!("Frame {} has no download URL", frame.id))
        })?;

        let mut response = Self::send(self.client.get(url)).await?;
        let mut file = tokio::fs::File::create(dest).await?;
        let mut size_bytes = 0;
        while let Some(chunk) = response.chunk().await.map_err(map_transport)? {
            size_bytes += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(size_bytes, dest = %dest.display(), "Frame downloaded");
        Ok(())
    }
}

/// The archive answers some missing frames with 200 and `{"detail": "Not found."}`
fn is_not_found_marker(body: &[u8]) -> bool {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("detail").and_then(Value::as_str).map(|d| d == "Not found."))
        .unwrap_or(false)
}

/// Map a non-success archive response into the service taxonomy
pub fn map_status(status: StatusCode, body: &[u8]) -> ThumbnailError {
    if status == StatusCode::NOT_FOUND {
        return ThumbnailError::UpstreamNotFound("Frame not found".to_string());
    }

    if status.is_client_error() {
        let payload = match serde_json::from_slice::<Value>(body) {
            Ok(Value::Object(map)) => map,
            Ok(other) => Map::from_iter([("detail".to_string(), other)]),
            Err(_) => Map::from_iter([(
                "detail".to_string(),
                Value::String(String::from_utf8_lossy(body).trim().to_string()),
            )]),
        };
        warn!(status = status.as_u16(), "Archive rejected request");
        return ThumbnailError::UpstreamClientError {
            status: status.as_u16(),
            message: format!("Archive request failed with status {}", status.as_u16()),
            payload,
        };
    }

    warn!(status = status.as_u16(), "Archive unavailable");
    ThumbnailError::UpstreamUnavailable(format!(
        "Archive request failed with status {}",
        status.as_u16()
    ))
}

/// Timeouts and connection failures are treated like a 5xx
pub fn map_transport(err: reqwest::Error) -> ThumbnailError {
    warn!(error = %err, timeout = err.is_timeout(), "Archive request failed");
    ThumbnailError::UpstreamUnavailable("Error communicating with the archive".to_string())
}
