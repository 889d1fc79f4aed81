use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const CONFIG_DIR: &str = "config";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_EVENT_BUS_BACKEND: &str = "redis";
const DEFAULT_EVENT_TOPIC: &str = "inventory_events";
const DEFAULT_RESERVATION_TTL_MINUTES: i64 = 15;
const DEFAULT_LOCK_TTL_SECONDS: u64 = 30;
const DEFAULT_MAX_RESERVATION_QUANTITY: i32 = 1000;
const DEFAULT_SWEEPER_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

/// Application configuration with validation.
///
/// Loaded from `config/default.toml`, an optional per-environment file
/// (`config/<APP_ENV>.toml`), and finally `APP_*` environment variables,
/// later sources overriding earlier ones.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL (postgres or sqlite)
    pub database_url: String,

    /// Redis connection URL (lock service + event broker)
    pub redis_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Event bus backend: "redis" or "memory"
    #[serde(default = "default_event_bus_backend")]
    pub event_bus_backend: String,

    /// Broker topic events are published to
    #[serde(default = "default_event_topic")]
    pub event_topic: String,

    /// Default reservation time-to-live in minutes
    #[validate(range(min = 1, max = 1440))]
    #[serde(default = "default_reservation_ttl_minutes")]
    pub reservation_ttl_minutes: i64,

    /// Distributed lock safety TTL in seconds; must exceed the worst-case
    /// critical section
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,

    /// Upper bound on a single stock adjustment / reservation quantity
    #[validate(range(min = 1, max = 100_000))]
    #[serde(default = "default_max_reservation_quantity")]
    pub max_reservation_quantity: i32,

    /// Interval between expired-reservation sweeps, in seconds
    #[validate(range(min = 1, max = 86_400))]
    #[serde(default = "default_sweeper_interval_seconds")]
    pub sweeper_interval_seconds: u64,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_event_bus_backend() -> String {
    DEFAULT_EVENT_BUS_BACKEND.to_string()
}

fn default_event_topic() -> String {
    DEFAULT_EVENT_TOPIC.to_string()
}

fn default_reservation_ttl_minutes() -> i64 {
    DEFAULT_RESERVATION_TTL_MINUTES
}

fn default_lock_ttl_seconds() -> u64 {
    DEFAULT_LOCK_TTL_SECONDS
}

fn default_max_reservation_quantity() -> i32 {
    DEFAULT_MAX_RESERVATION_QUANTITY
}

fn default_sweeper_interval_seconds() -> u64 {
    DEFAULT_SWEEPER_INTERVAL_SECONDS
}

fn default_db_max_connections() -> u32 {
    DEFAULT_DB_MAX_CONNECTIONS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Loads and validates configuration from files and environment.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

    let builder = Config::builder()
        .add_source(File::from(Path::new(CONFIG_DIR).join("default.toml")).required(false))
        .add_source(File::from(Path::new(CONFIG_DIR).join(format!("{run_env}.toml"))).required(false))
        .add_source(Environment::with_prefix("APP"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(
        environment = %run_env,
        event_bus_backend = %cfg.event_bus_backend,
        "configuration loaded"
    );

    Ok(cfg)
}

/// Initializes the tracing subscriber using the configured level and format.
pub fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    if config.log_json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
