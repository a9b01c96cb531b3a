//! Engine configuration and request-option parsing.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Monitor engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Number of snapshot buffers in the pool. Fixed for the engine's life.
    pub queue_size: usize,
    /// Promote coalesced changes as soon as a release frees a buffer, instead
    /// of waiting for the next update.
    pub flush_on_release: bool,
    /// Name used in log output.
    pub name: Option<String>,
}

impl MonitorConfig {
    /// Smallest pool that can double-buffer `current` and `next`.
    pub const MIN_QUEUE_SIZE: usize = 2;

    /// Default pool size.
    pub const DEFAULT_QUEUE_SIZE: usize = 2;

    /// Config with the given queue size and defaults otherwise.
    #[must_use]
    pub fn with_queue_size(queue_size: usize) -> Self {
        Self {
            queue_size,
            ..Self::default()
        }
    }

    /// Check the configuration without building an engine.
    ///
    /// An engine built from an invalid config still constructs; it reports
    /// the problem from `start()` instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size < Self::MIN_QUEUE_SIZE {
            return Err(ConfigError::QueueSizeTooSmall {
                min: Self::MIN_QUEUE_SIZE,
                actual: self.queue_size,
            });
        }
        Ok(())
    }

    /// Parse transport-layer request options such as
    /// `"queueSize=4,flushOnRelease=true"`.
    ///
    /// Options are comma separated `key=value` pairs; keys are accepted in
    /// camelCase or snake_case. Unknown keys are rejected.
    pub fn from_options(options: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for pair in options.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| ConfigError::InvalidOptionValue {
                option: pair.to_string(),
                value: String::new(),
            })?;
            config.apply_option(key.trim(), value.trim())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply a single `key=value` option.
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidOptionValue {
            option: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "queueSize" | "queue_size" => {
                self.queue_size = value.parse().map_err(|_| invalid())?;
            }
            "flushOnRelease" | "flush_on_release" => {
                self.flush_on_release = value.parse().map_err(|_| invalid())?;
            }
            "name" => {
                if value.is_empty() {
                    return Err(invalid());
                }
                self.name = Some(value.to_string());
            }
            _ => {
                return Err(ConfigError::UnknownOption {
                    option: key.to_string(),
                })
            }
        }
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            queue_size: Self::DEFAULT_QUEUE_SIZE,
            flush_on_release: false,
            name: None,
        }
    }
}
