use anyhow::bail;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the gallery service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// S3 object storage configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Upload policy configuration
    pub upload: UploadConfig,
    /// API configuration
    pub api: ApiConfig,
    /// Public site configuration (QR link, event title)
    pub site: SiteConfig,
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
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// S3 bucket name for uploaded media
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Public read base URL; blobs resolve as `<public_base_url>/<key>`
    pub public_base_url: String,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Which media kinds the event accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edition {
    /// Images only; any `video/*` upload is rejected
    ImageOnly,
    /// Images and short videos
    ImageAndVideo,
}

/// Upload policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Accepted media kinds
    #[serde(default = "default_edition")]
    pub edition: Edition,
    /// Maximum image size in bytes (5MB default)
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    /// Maximum video size in bytes (50MB default)
    #[serde(default = "default_max_video_bytes")]
    pub max_video_bytes: usize,
    /// Timeout per blob write / record insert in seconds
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

/// API configuration
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
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum request body size in bytes for the upload route. Sized to
    /// admit many max-size files per batch; per-file limits are enforced
    /// individually during validation.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Public site configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Fixed URL the QR code encodes (the event landing page)
    pub public_url: String,
    /// Event title shown alongside the gallery
    #[serde(default = "default_event_title")]
    pub event_title: String,
}

// Default value functions
fn default_service_name() -> String {
    "gallery-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_edition() -> Edition {
    Edition::ImageAndVideo
}

fn default_max_image_bytes() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_video_bytes() -> usize {
    50 * 1024 * 1024 // 50MB
}

fn default_io_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_body_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_event_title() -> String {
    "Event Gallery".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "gallery-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/gallery").required(false))
            .add_source(config::File::with_name("/etc/gallery/gallery").required(false))
            // Override with environment variables
            // GALLERY__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("GALLERY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration once at startup; components receive only
    /// derived values afterwards
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.s3.bucket.is_empty() {
            bail!("s3.bucket must not be empty");
        }
        if self.s3.public_base_url.is_empty() {
            bail!("s3.public_base_url must not be empty");
        }
        if self.site.public_url.is_empty() {
            bail!("site.public_url must not be empty");
        }
        if self.upload.max_image_bytes == 0 || self.upload.max_video_bytes == 0 {
            bail!("upload size limits must be positive");
        }
        if self.api.max_body_bytes < self.upload.max_video_bytes {
            bail!("api.max_body_bytes must admit at least one max-size file");
        }
        Ok(())
    }

    /// Get database connection timeout as Duration
    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }

    /// Get database idle timeout as Duration
    pub fn db_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.database.idle_timeout_secs)
    }

    /// Get per-call upload I/O timeout as Duration
    pub fn upload_io_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.io_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}
