use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the thumbnail service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Archive API configuration
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// S3 configuration
    #[serde(default)]
    pub s3: S3Config,
    /// Frame validation rules
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Image codec configuration
    #[serde(default)]
    pub codec: CodecConfig,
    /// Channel alignment configuration
    #[serde(default)]
    pub alignment: AlignmentConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Directory for downloaded frames and rendered thumbnails
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
    /// Remove everything left in `tmp_dir` when the process starts
    ///
    /// Only for a single process owning `tmp_dir`; with several processes
    /// sharing it, leave this off and let the supervisor run `sweep-all`
    /// before starting them.
    #[serde(default)]
    pub sweep_tmp_on_start: bool,
}

/// Archive API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Base URL of the archive API, always ending in `/`
    #[serde(default = "default_archive_api_url", deserialize_with = "with_trailing_slash")]
    pub api_url: String,
    /// Timeout for every archive call, including frame downloads
    #[serde(default = "default_archive_timeout_secs")]
    pub timeout_secs: u64,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for rendered thumbnails
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Static access key; the default provider chain is used when unset
    pub access_key_id: Option<String>,
    /// Static secret key paired with `access_key_id`
    pub secret_access_key: Option<String>,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

/// Which frames may be rendered at all, and which in colour
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Keys that must be present on a frame descriptor
    #[serde(default = "default_required_frame_keys", deserialize_with = "comma_list")]
    pub required_frame_keys: Vec<String>,
    /// Observation types that carry an image
    #[serde(default = "default_valid_obstypes", deserialize_with = "comma_list")]
    pub valid_obstypes: Vec<String>,
    /// Observation types eligible for colour composites
    #[serde(default = "default_valid_color_obstypes", deserialize_with = "comma_list")]
    pub valid_color_obstypes: Vec<String>,
    /// Recognised FITS filename extensions
    #[serde(default = "default_fits_extensions", deserialize_with = "comma_list")]
    pub fits_extensions: Vec<String>,
}

/// External codec used to render FITS frames to JPEG
#[derive(Debug, Clone, Deserialize)]
pub struct CodecConfig {
    /// Program invoked as `command [flags] <output> <input>...`
    #[serde(default = "default_codec_command")]
    pub command: String,
}

/// External registration program for colour composites
#[derive(Debug, Clone, Deserialize)]
pub struct AlignmentConfig {
    /// Attempt to align colour channels before compositing
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Program invoked as `command <reference> <target> <output>`
    pub command: Option<String>,
}

/// API configuration for the thumbnail endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default, deserialize_with = "comma_list")]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "thumbservice".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("/tmp/thumbservice/")
}

fn default_true() -> bool {
    true
}

fn default_archive_api_url() -> String {
    "https://archive-api.lco.global/".to_string()
}

fn default_archive_timeout_secs() -> u64 {
    30
}

fn default_bucket() -> String {
    "lcogtthumbnails".to_string()
}

fn default_region() -> String {
    "us-west-2".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    8 * 3600
}

fn default_required_frame_keys() -> Vec<String> {
    split_list("configuration_type,request_id,filename")
}

fn default_valid_obstypes() -> Vec<String> {
    split_list(
        "ARC,BIAS,BPM,DARK,DOUBLE,EXPERIMENTAL,EXPOSE,GUIDE,LAMPFLAT,SKYFLAT,SPECTRUM,STANDARD,TARGET,TRAILED",
    )
}

fn default_valid_color_obstypes() -> Vec<String> {
    split_list("EXPOSE,STANDARD")
}

fn default_fits_extensions() -> Vec<String> {
    split_list(".fits,.fits.fz")
}

fn default_codec_command() -> String {
    "fits2jpg".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

/// Split a comma-separated setting, ignoring blanks and surrounding spaces
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

/// Accept either a sequence or a comma-separated string (environment overrides)
fn comma_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        String(String),
    }

    Ok(match ListOrString::deserialize(deserializer)? {
        ListOrString::List(items) => items
            .iter()
            .flat_map(|item| split_list(item))
            .collect(),
        ListOrString::String(value) => split_list(&value),
    })
}

fn with_trailing_slash<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let mut url = String::deserialize(deserializer)?;
    if !url.ends_with('/') {
        url.push('/');
    }
    Ok(url)
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/thumbservice").required(false))
            .add_source(config::File::with_name("/etc/thumbservice/thumbservice").required(false))
            // Override with environment variables
            // THUMBSERVICE__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("THUMBSERVICE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.s3.presigned_url_expiry_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            tmp_dir: default_tmp_dir(),
            sweep_tmp_on_start: false,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            api_url: default_archive_api_url(),
            timeout_secs: default_archive_timeout_secs(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
            presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            required_frame_keys: default_required_frame_keys(),
            valid_obstypes: default_valid_obstypes(),
            valid_color_obstypes: default_valid_color_obstypes(),
            fits_extensions: default_fits_extensions(),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            command: default_codec_command(),
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}
