//! Configuration loader with file search paths and environment overrides.

use crate::{ConfigError, ConsumerConfig};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths, checked in order.
const CONFIG_PATHS: &[&str] = &[
    "relay.toml",
    "config.toml",
    "./config/relay.toml",
    "/etc/relay/relay.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides applied on top. Validation is left to the caller so the
    /// overrides can complete a partial file.
    pub fn load(&self) -> Result<ConsumerConfig, ConfigError> {
        let mut config = ConsumerConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = ConsumerConfig::from_file(&path)?;
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

        if let Ok(path) = env::var("RELAY_CONFIG") {
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

    fn apply_env_overrides(&self, config: &mut ConsumerConfig) {
        if let Ok(val) = env::var("RELAY_SUBSCRIPTION") {
            config.subscription = val;
        }
        if let Ok(val) = env::var("RELAY_IDLE_HANDLER") {
            config.idle_handler = Some(val);
        }
        if let Ok(val) = env::var("RELAY_IDLE_DELAY_SECS") {
            if let Ok(secs) = val.parse() {
                config.idle_delay_secs = secs;
            }
        }
        if let Ok(val) = env::var("RELAY_FAILURE_PAUSE_SECS") {
            if let Ok(secs) = val.parse() {
                config.failure_pause_secs = secs;
            }
        }
        if let Ok(val) = env::var("RELAY_QUARANTINE_THRESHOLD") {
            if let Ok(threshold) = val.parse() {
                config.quarantine_threshold = threshold;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
