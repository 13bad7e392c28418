//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "pulseone.toml",
    "./config/config.toml",
    "/etc/pulseone/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { config_path: Some(path.into()) }
    }

    /// Load configuration from file (if found), then apply environment
    /// variable overrides.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            AppConfig::from_file(&path)?
        } else {
            AppConfig::default()
        };

        self.apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("PULSEONE_CONFIG") {
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
        if let Ok(val) = env::var("PULSEONE_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("PULSEONE_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("PULSEONE_DATABASE_URL") {
            config.database.url = val;
        }
        if let Ok(val) = env::var("PULSEONE_REDIS_URL") {
            config.redis.url = val;
        }
        if let Ok(val) = env::var("PULSEONE_EDGE_SERVER_ID") {
            config.collector.edge_server_id = val.parse().ok();
        }
        if let Ok(val) = env::var("PULSEONE_POLLING_INTERVAL_DEFAULT_MS") {
            if let Ok(v) = val.parse() {
                config.collector.polling_interval_default_ms = v;
            }
        }
        if let Ok(val) = env::var("PULSEONE_EXPORT_FAILED_FILE_PATH") {
            config.export.failed_file_path = val;
        }
        if let Ok(val) = env::var("PULSEONE_EXPORT_MAX_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                config.export.max_batch_size = v;
            }
        }
        if let Ok(val) = env::var("PULSEONE_SECRETS_PROVIDER") {
            config.secrets.provider = val;
        }
        if let Ok(val) = env::var("PULSEONE_SECRETS_ENCRYPTION_KEY") {
            config.secrets.encryption_key = val;
        }
        if let Ok(val) = env::var("PULSEONE_DATA_DIR") {
            config.data_dir = val;
        }
        if let Ok(val) = env::var("PULSEONE_DEV_MODE") {
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
    fn loads_defaults_when_no_file_present() {
        let loader = ConfigLoader::with_path("/nonexistent/path/config.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn loads_from_explicit_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{}", AppConfig::example_toml()).unwrap();

        let loader = ConfigLoader::with_path(&path);
        let config = loader.load().unwrap();
        assert_eq!(config.collector.edge_server_id, Some(1001));
    }

    #[test]
    fn env_override_wins_over_file() {
        std::env::set_var("PULSEONE_HTTP_PORT", "9999");
        let loader = ConfigLoader::with_path("/nonexistent/path/config.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.http.port, 9999);
        std::env::remove_var("PULSEONE_HTTP_PORT");
    }
}
