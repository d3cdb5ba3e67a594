use clap::{Args, Parser, ValueEnum};
use ipnetwork::IpNetwork;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Database connection URL
    #[arg(long, env = "PARLEY_DATABASE_URL")]
    pub database_url: String,

    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub chat: ChatConfig,

    #[command(flatten)]
    pub presence: PresenceConfig,

    #[command(flatten)]
    pub pubsub: PubSubConfig,

    #[command(flatten)]
    pub fanout: FanoutConfig,

    #[command(flatten)]
    pub rate_limit: RateLimitConfig,

    #[command(flatten)]
    pub health: HealthConfig,

    #[command(flatten)]
    pub sweep: SweepConfig,

    #[command(flatten)]
    pub storage: S3Config,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "PARLEY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PARLEY_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Port for the management server (health probes)
    #[arg(long, env = "PARLEY_MGMT_PORT", default_value_t = 3001)]
    pub mgmt_port: u16,

    /// How long to wait for background tasks to finish on shutdown
    #[arg(long, env = "PARLEY_SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Request timeout for HTTP endpoints in seconds
    #[arg(long, env = "PARLEY_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Comma-separated list of CIDRs to trust for X-Forwarded-For IP extraction
    #[arg(
        long,
        env = "PARLEY_TRUSTED_PROXIES",
        default_value = "10.0.0.0/8,172.16.0.0/12,192.168.0.0/16,127.0.0.1/32",
        value_delimiter = ','
    )]
    pub trusted_proxies: Vec<IpNetwork>,
}

#[derive(Clone, Debug, Args)]
pub struct AuthConfig {
    /// Secret key for JWT verification
    #[arg(long, env = "PARLEY_JWT_SECRET")]
    pub jwt_secret: String,
}

#[derive(Clone, Debug, Args)]
pub struct ChatConfig {
    /// Hex-encoded 32-byte key for message body encryption. Rejected at
    /// startup if malformed or all zeroes.
    #[arg(long, env = "PARLEY_MESSAGE_KEY")]
    pub message_key: String,
}

#[derive(Clone, Debug, Args)]
pub struct PresenceConfig {
    /// Time-to-live for online presence records in seconds
    #[arg(long, env = "PARLEY_PRESENCE_TTL_SECS", default_value_t = 300)]
    pub presence_ttl_secs: u64,

    /// Time-to-live for typing indicator records in seconds
    #[arg(long, env = "PARLEY_TYPING_TTL_SECS", default_value_t = 5)]
    pub typing_ttl_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct PubSubConfig {
    /// Redis connection URL
    #[arg(long, env = "PARLEY_REDIS_URL")]
    pub url: String,

    /// Minimum backoff between pub/sub reconnect attempts
    #[arg(long, env = "PARLEY_REDIS_MIN_BACKOFF_SECS", default_value_t = 1)]
    pub min_backoff_secs: u64,

    /// Maximum backoff between pub/sub reconnect attempts
    #[arg(long, env = "PARLEY_REDIS_MAX_BACKOFF_SECS", default_value_t = 30)]
    pub max_backoff_secs: u64,
}

#[derive(Clone, Debug, Args)]
pub struct FanoutConfig {
    /// How often to reap event channels with no remaining receivers
    #[arg(long, env = "PARLEY_FANOUT_GC_INTERVAL_SECS", default_value_t = 60)]
    pub gc_interval_secs: u64,

    /// Capacity of each per-user event channel
    #[arg(long, env = "PARLEY_FANOUT_CHANNEL_CAPACITY", default_value_t = 16)]
    pub user_channel_capacity: usize,

    /// Capacity of the shared pub/sub pattern channels
    #[arg(long, env = "PARLEY_FANOUT_GLOBAL_CHANNEL_CAPACITY", default_value_t = 1024)]
    pub global_channel_capacity: usize,
}

#[derive(Clone, Debug, Args)]
pub struct RateLimitConfig {
    /// Requests per second allowed per client IP
    #[arg(long, env = "PARLEY_RATE_LIMIT_PER_SECOND", default_value_t = 10)]
    pub per_second: u32,

    /// Burst allowance per client IP
    #[arg(long, env = "PARLEY_RATE_LIMIT_BURST", default_value_t = 20)]
    pub burst: u32,
}

#[derive(Clone, Debug, Args)]
pub struct HealthConfig {
    /// Timeout for the database readiness probe in milliseconds
    #[arg(long, env = "PARLEY_HEALTH_DB_TIMEOUT_MS", default_value_t = 2000)]
    pub db_timeout_ms: u64,

    /// Timeout for the object storage readiness probe in milliseconds
    #[arg(long, env = "PARLEY_HEALTH_STORAGE_TIMEOUT_MS", default_value_t = 2000)]
    pub storage_timeout_ms: u64,

    /// Timeout for the pub/sub readiness probe in milliseconds
    #[arg(long, env = "PARLEY_HEALTH_PUBSUB_TIMEOUT_MS", default_value_t = 2000)]
    pub pubsub_timeout_ms: u64,
}

#[derive(Clone, Debug, Args)]
pub struct SweepConfig {
    /// How often to run the payload reconciliation sweep
    #[arg(long, env = "PARLEY_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub interval_secs: u64,

    /// Minimum age of a row before the sweep will touch it
    #[arg(long, env = "PARLEY_SWEEP_GRACE_SECS", default_value_t = 600)]
    pub grace_secs: u64,

    /// Maximum number of rows to remediate in a single pass
    #[arg(long, env = "PARLEY_SWEEP_BATCH_LIMIT", default_value_t = 500)]
    pub batch_limit: i64,
}

#[derive(Clone, Debug, Args)]
pub struct S3Config {
    /// S3 bucket name
    #[arg(long, env = "PARLEY_S3_BUCKET")]
    pub bucket: String,

    /// S3 region
    #[arg(long, env = "PARLEY_S3_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Custom S3 endpoint (useful for MinIO)
    #[arg(long, env = "PARLEY_S3_ENDPOINT")]
    pub endpoint: Option<String>,

    /// S3 access key
    #[arg(long, env = "PARLEY_S3_ACCESS_KEY")]
    pub access_key: Option<String>,

    /// S3 secret key
    #[arg(long, env = "PARLEY_S3_SECRET_KEY")]
    pub secret_key: Option<String>,

    /// Force path style (required for many MinIO setups: http://host/bucket/key)
    #[arg(long, env = "PARLEY_S3_FORCE_PATH_STYLE", default_value_t = false)]
    pub force_path_style: bool,

    /// Base URL for serving uploaded media; falls back to the endpoint or
    /// the standard S3 URL form when unset
    #[arg(long, env = "PARLEY_S3_PUBLIC_URL_BASE")]
    pub public_url_base: Option<String>,

    /// Max attachment size in bytes (Default: 50MB)
    #[arg(long, env = "PARLEY_S3_MAX_SIZE_BYTES", default_value_t = 52_428_800)]
    pub attachment_max_size_bytes: usize,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// OTLP collector endpoint; telemetry export is disabled when unset
    #[arg(long, env = "PARLEY_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Log output format
    #[arg(long, env = "PARLEY_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    pub fn load() -> Self {
        Self::parse()
    }
}
