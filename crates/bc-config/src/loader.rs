//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths.
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "blast.toml",
    "./config/config.toml",
    "/etc/blast/config.toml",
];

/// Configuration loader.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path.
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { config_path: Some(path.into()) }
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("BLAST_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // HTTP
        if let Ok(val) = env::var("BLAST_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("BLAST_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("BLAST_CORS_ORIGINS") {
            config.http.cors_origins = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Database
        if let Ok(val) = env::var("BLAST_DATABASE_URL") {
            config.database.url = val;
        }
        if let Ok(val) = env::var("BLAST_DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                config.database.max_connections = n;
            }
        }

        // Cache
        if let Ok(val) = env::var("BLAST_CACHE_L1_CAPACITY") {
            if let Ok(n) = val.parse() {
                config.cache.l1_capacity = n;
            }
        }
        if let Ok(val) = env::var("BLAST_CACHE_L1_TTL_SECS") {
            if let Ok(n) = val.parse() {
                config.cache.l1_ttl_secs = n;
            }
        }
        if let Ok(val) = env::var("BLAST_CACHE_L2_TTL_SECS") {
            if let Ok(n) = val.parse() {
                config.cache.l2_ttl_secs = n;
            }
        }
        if let Ok(val) = env::var("BLAST_CACHE_L3_TTL_SECS") {
            if let Ok(n) = val.parse() {
                config.cache.l3_ttl_secs = n;
            }
        }

        // Runner
        if let Ok(val) = env::var("BLAST_RUNNER_MAX_CONCURRENT_CAMPAIGNS") {
            if let Ok(n) = val.parse() {
                config.runner.max_concurrent_campaigns = n;
            }
        }
        if let Ok(val) = env::var("BLAST_RUNNER_POLL_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                config.runner.poll_interval_ms = n;
            }
        }
        if let Ok(val) = env::var("BLAST_RUNNER_CLAIM_STALE_THRESHOLD_SECS") {
            if let Ok(n) = val.parse() {
                config.runner.claim_stale_threshold_secs = n;
            }
        }
        if let Ok(val) = env::var("BLAST_RUNNER_RECOVERY_INTERVAL_SECS") {
            if let Ok(n) = val.parse() {
                config.runner.recovery_interval_secs = n;
            }
        }

        // Emergency monitor
        if let Ok(val) = env::var("BLAST_EMERGENCY_MONITOR_ENABLED") {
            config.emergency_monitor.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("BLAST_EMERGENCY_MONITOR_BAN_RATE_THRESHOLD") {
            if let Ok(n) = val.parse() {
                config.emergency_monitor.ban_rate_threshold = n;
            }
        }
        if let Ok(val) = env::var("BLAST_EMERGENCY_MONITOR_ROLLING_WINDOW_SECS") {
            if let Ok(n) = val.parse() {
                config.emergency_monitor.rolling_window_secs = n;
            }
        }

        // Transport
        if let Ok(val) = env::var("BLAST_TRANSPORT_SEND_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                config.transport.send_timeout_secs = n;
            }
        }

        // General
        if let Ok(val) = env::var("BLAST_DATA_DIR") {
            config.data_dir = val;
        }
        if let Ok(val) = env::var("BLAST_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\nport = 6060\n").unwrap();
        let loader = ConfigLoader::with_path(file.path());
        let config = loader.load().unwrap();
        assert_eq!(config.http.port, 6060);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loader = ConfigLoader::with_path("/nonexistent/path/blast.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.http.port, 8080);
    }
}
