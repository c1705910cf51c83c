use crate::cache_key::CacheKey;
use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors raised by the object store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to check object {key}: {message}")]
    Head { key: String, message: String },

    #[error("Failed to upload object {key}: {message}")]
    Put { key: String, message: String },

    #[error("Failed to presign object {key}: {message}")]
    Presign { key: String, message: String },

    #[error("Failed to read local file: {0}")]
    Read(#[from] std::io::Error),
}

/// Keyed, effectively immutable blob store holding rendered thumbnails
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether an object is stored under `key`
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Store `body` under `key`
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    /// Issue a GET URL for `key` that expires after `ttl`
    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        // Static credentials take precedence over the provider chain
        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id.clone(),
                secret.clone(),
                None,
                None,
                "thumbservice-config",
            ));
        }

        let aws_config = loader.load().await;
        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(StorageError::Head {
                        key: key.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Put {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let presign_error = |message: String| StorageError::Presign {
            key: key.to_string(),
            message,
        };

        let presigning_config =
            PresigningConfig::expires_in(ttl).map_err(|e| presign_error(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| presign_error(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

/// Presigned URL for a stored thumbnail
#[derive(Debug, Clone, PartialEq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Cache gate, uploader and URL issuer for rendered thumbnails
#[derive(Clone)]
pub struct ThumbnailStore {
    store: Arc<dyn ObjectStore>,
    url_expiry: Duration,
}

impl ThumbnailStore {
    pub fn new(store: Arc<dyn ObjectStore>, url_expiry: Duration) -> Self {
        Self { store, url_expiry }
    }

    /// Whether the thumbnail was rendered before
    ///
    /// Not transactional: two first requests for the same key may both render
    /// and upload, which is harmless because the object is content-addressed.
    pub async fn exists(&self, key: &CacheKey) -> Result<bool, StorageError> {
        self.store.exists(key.as_str()).await
    }

    /// Upload a rendered JPEG under `key`
    #[instrument(skip(self), fields(key = %key))]
    pub async fn upload(&self, key: &CacheKey, local_path: &Path) -> Result<(), StorageError> {
        let body = tokio::fs::read(local_path).await?;
        let size_bytes = body.len();

        self.store.put(key.as_str(), body, "image/jpeg").await?;

        debug!(size_bytes, "Thumbnail uploaded");
        Ok(())
    }

    /// Issue a time-limited GET URL for `key`
    pub async fn sign_url(&self, key: &CacheKey) -> Result<SignedUrl, StorageError> {
        let url = self.store.presign_get(key.as_str(), self.url_expiry).await?;
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.url_expiry).unwrap_or_else(|_| chrono::Duration::zero());

        Ok(SignedUrl { url, expires_at })
    }
}
