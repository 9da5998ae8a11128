//! Blast Campaign configuration system.
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Environment variable error: {0}")]
    EnvError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub runner: RunnerConfig,
    pub emergency_monitor: EmergencyMonitorConfig,
    pub transport: TransportConfig,

    /// Data directory for local storage (sqlite file, etc).
    pub data_dir: String,

    /// Enable development mode (relaxed defaults, verbose logging).
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            runner: RunnerConfig::default(),
            emergency_monitor: EmergencyMonitorConfig::default(),
            transport: TransportConfig::default(),
            data_dir: "./data".to_string(),
            dev_mode: false,
        }
    }
}

/// HTTP control-plane server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["http://localhost:4200".to_string()],
        }
    }
}

/// Durable store configuration (campaigns, queue_items, validation cache).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL, e.g. `sqlite://./data/blast.db`.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/blast.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Phone validation cache tier TTLs, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub l1_capacity: usize,
    pub l1_ttl_secs: u64,
    pub l2_ttl_secs: u64,
    pub l3_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 10_000,
            l1_ttl_secs: 3_600,
            l2_ttl_secs: 86_400,
            l3_ttl_secs: 604_800,
        }
    }
}

/// Campaign runner worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Max campaigns running concurrently per process.
    pub max_concurrent_campaigns: usize,
    /// claimNext poll interval when a campaign's queue is momentarily empty.
    pub poll_interval_ms: u64,
    /// Stale CLAIMED item recovery threshold in seconds.
    pub claim_stale_threshold_secs: u64,
    /// Interval between stale-item recovery sweeps.
    pub recovery_interval_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_campaigns: 50,
            poll_interval_ms: 250,
            claim_stale_threshold_secs: 120,
            recovery_interval_secs: 30,
        }
    }
}

/// EmergencyMonitor thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyMonitorConfig {
    pub enabled: bool,
    /// Lifetime failure rate that triggers auto-pause for a campaign.
    pub ban_rate_threshold: f64,
    /// How often the monitor re-evaluates every running campaign's
    /// failure rate against `ban_rate_threshold`.
    pub rolling_window_secs: u64,
}

impl Default for EmergencyMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ban_rate_threshold: 0.15,
            rolling_window_secs: 600,
        }
    }
}

/// Default `ChatTransport` timeout and retry knobs, used when a campaign's
/// own `retryConfig` doesn't specify one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub send_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { send_timeout_secs: 30 }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with standard search paths and environment
    /// variable overrides applied.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Generate an example TOML configuration.
    pub fn example_toml() -> String {
        r#"# Blast Campaign Execution Core configuration
# Environment variables prefixed BLAST_ override these settings

[http]
port = 8080
host = "0.0.0.0"
cors_origins = ["http://localhost:4200"]

[database]
url = "sqlite://./data/blast.db"
max_connections = 10

[cache]
l1_capacity = 10000
l1_ttl_secs = 3600
l2_ttl_secs = 86400
l3_ttl_secs = 604800

[runner]
max_concurrent_campaigns = 50
poll_interval_ms = 250
claim_stale_threshold_secs = 120
recovery_interval_secs = 30

[emergency_monitor]
enabled = true
ban_rate_threshold = 0.15
rolling_window_secs = 600

[transport]
send_timeout_secs = 30

data_dir = "./data"
dev_mode = false
"#
        .to_string()
    }
}
