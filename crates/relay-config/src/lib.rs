//! Relay consumer configuration.
//!
//! TOML-based configuration with environment variable overrides. A
//! consumer needs a subscription name and at least one handler binding;
//! anything less is a startup-time fatal error.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root consumer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Subscription to poll. Required.
    pub subscription: String,

    /// Identifier of the idle handler to run on empty polls. Optional;
    /// without one the loop just sleeps through idle periods.
    pub idle_handler: Option<String>,

    /// Ordered handler bindings. Must not be empty.
    pub handlers: Vec<HandlerBindingConfig>,

    /// Delay before the next poll after an idle pass that did no work.
    pub idle_delay_secs: u64,

    /// Throttling pause after a tracked handler failure.
    pub failure_pause_secs: u64,

    /// Try count at which a repeatedly failing message is quarantined.
    pub quarantine_threshold: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            subscription: String::new(),
            idle_handler: None,
            handlers: Vec::new(),
            idle_delay_secs: 3,
            failure_pause_secs: 5,
            quarantine_threshold: 3,
        }
    }
}

/// One message-type binding: which schema to decode with (absent means
/// raw JSON) and which handler to invoke. An entry without a
/// `message_type` declares the default binding for unmapped messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerBindingConfig {
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    pub handler: String,
}

impl ConsumerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ConsumerConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Fail fast on configuration that cannot start a consumer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subscription.is_empty() {
            return Err(ConfigError::ValidationError(
                "subscription is required".to_string(),
            ));
        }
        if self.handlers.is_empty() {
            return Err(ConfigError::ValidationError(
                "no message handlers defined".to_string(),
            ));
        }
        for binding in &self.handlers {
            if binding.handler.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "handler id is empty for message type {:?}",
                    binding.message_type
                )));
            }
        }
        Ok(())
    }
}
