use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CACHE_TYPE: &str = "redis";
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_BUS_NAMESPACE: &str = "payments:bus";
const DEFAULT_BUS_PARTITIONS: u32 = 8;
const DEFAULT_BUS_GROUP: &str = "payments-service";
const DEFAULT_BUS_CONSUMER: &str = "payments-1";
const DEFAULT_WEBHOOK_LOCK_TTL_SECS: u64 = 30;
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;

/// Cache configuration
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CacheConfig {
    /// Type of cache to use: "redis" or "in-memory"
    #[serde(default = "default_cache_type")]
    pub cache_type: String,

    /// TTL for payment point-lookup entries, in seconds
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_type: default_cache_type(),
            default_ttl_secs: default_cache_ttl(),
        }
    }
}

/// Message-bus client configuration, shared by producer and consumer.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct BusConfig {
    /// Stream key prefix; streams are named `{namespace}:{topic}:{partition}`
    #[serde(default = "default_bus_namespace")]
    pub namespace: String,

    /// Number of partitions per topic
    #[serde(default = "default_bus_partitions")]
    pub partitions: u32,

    /// Bounded send timeout for a single publish
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Startup connection retry budget
    #[serde(default = "default_connect_retries")]
    pub connect_max_retries: u32,

    #[serde(default = "default_connect_backoff")]
    pub connect_backoff_secs: u64,

    #[serde(default = "default_bus_group")]
    pub consumer_group: String,

    #[serde(default = "default_bus_consumer")]
    pub consumer_name: String,

    /// Blocking read timeout per poll, milliseconds
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: usize,

    /// How long a partition pauses after a handler failure
    #[serde(default = "default_pause_on_error")]
    pub pause_on_error_secs: u64,

    /// Bounded worker budget shared across partitions
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Keep-alive reclaim interval during long-running handlers
    #[serde(default = "default_claim_interval")]
    pub claim_interval_secs: u64,

    /// Inbound topics this instance subscribes to
    #[serde(default = "default_subscribe_topics")]
    pub subscribe_topics: Vec<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            namespace: default_bus_namespace(),
            partitions: default_bus_partitions(),
            send_timeout_secs: default_send_timeout(),
            connect_max_retries: default_connect_retries(),
            connect_backoff_secs: default_connect_backoff(),
            consumer_group: default_bus_group(),
            consumer_name: default_bus_consumer(),
            block_timeout_ms: default_block_timeout_ms(),
            pause_on_error_secs: default_pause_on_error(),
            max_concurrency: default_max_concurrency(),
            claim_interval_secs: default_claim_interval(),
            subscribe_topics: default_subscribe_topics(),
        }
    }
}

/// Per-provider gateway credentials. Only providers with credentials present
/// are registered; requesting any other is a hard error at call time.
#[derive(Clone, Debug, Deserialize)]
pub struct GatewaysConfig {
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
    pub paystack: Option<PaystackConfig>,
    pub flutterwave: Option<FlutterwaveConfig>,
}

impl Default for GatewaysConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_gateway_timeout(),
            paystack: None,
            flutterwave: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PaystackConfig {
    pub secret_key: String,
    pub base_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FlutterwaveConfig {
    pub secret_key: String,
    /// Static hash compared against the `verif-hash` webhook header
    pub secret_hash: String,
    pub base_url: Option<String>,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    /// Redis connection URL (cache, locks, and bus)
    #[validate(length(min = 1))]
    pub redis_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Create the payments schema on startup if it is missing
    #[serde(default)]
    pub auto_create_schema: bool,

    /// Base URL gateways redirect customers back to after checkout
    pub callback_base_url: Option<String>,

    /// TTL of the webhook-processing lock, in seconds
    #[serde(default = "default_webhook_lock_ttl")]
    pub webhook_lock_ttl_secs: u64,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub gateways: GatewaysConfig,
}

impl AppConfig {
    /// Minimal constructor used by tests and tooling; everything else takes
    /// its default.
    pub fn new(database_url: impl Into<String>, redis_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            redis_url: redis_url.into(),
            host: default_host(),
            port: default_port(),
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_create_schema: false,
            callback_base_url: None,
            webhook_lock_ttl_secs: default_webhook_lock_ttl(),
            cache: CacheConfig::default(),
            bus: BusConfig::default(),
            gateways: GatewaysConfig::default(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Load configuration from `config/default.toml`, an environment-specific
/// file, and `APP_`-prefixed environment variables, in that order.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment =
        std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()
        .map_err(|e| ConfigError::Message(e.to_string()))?;
    Ok(app)
}

/// Initialize the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn default_cache_type() -> String {
    DEFAULT_CACHE_TYPE.to_string()
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_bus_namespace() -> String {
    DEFAULT_BUS_NAMESPACE.to_string()
}

fn default_bus_partitions() -> u32 {
    DEFAULT_BUS_PARTITIONS
}

fn default_send_timeout() -> u64 {
    5
}

fn default_connect_retries() -> u32 {
    5
}

fn default_connect_backoff() -> u64 {
    2
}

fn default_bus_group() -> String {
    DEFAULT_BUS_GROUP.to_string()
}

fn default_bus_consumer() -> String {
    DEFAULT_BUS_CONSUMER.to_string()
}

fn default_block_timeout_ms() -> usize {
    5000
}

fn default_pause_on_error() -> u64 {
    5
}

fn default_max_concurrency() -> usize {
    4
}

fn default_claim_interval() -> u64 {
    30
}

fn default_subscribe_topics() -> Vec<String> {
    vec![crate::events::topics::PAYMENT_EXTERNAL_FAILED.to_string()]
}

fn default_gateway_timeout() -> u64 {
    DEFAULT_GATEWAY_TIMEOUT_SECS
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_webhook_lock_ttl() -> u64 {
    DEFAULT_WEBHOOK_LOCK_TTL_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_validates() {
        let cfg = AppConfig::new("sqlite::memory:", "redis://localhost:6379");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn bus_defaults_subscribe_to_reconciliation_topic() {
        let bus = BusConfig::default();
        assert_eq!(
            bus.subscribe_topics,
            vec!["order.payment.external_failed".to_string()]
        );
        assert_eq!(bus.partitions, 8);
    }
}
