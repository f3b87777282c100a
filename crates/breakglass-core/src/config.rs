//! Engine configuration.
//!
//! Deployments tune the engine through an [`EngineConfig`], loadable from a
//! TOML file. All fields have defaults matching the shipped policy; validation
//! is fail-closed and rejects values that would weaken the justification or
//! sweep guarantees.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum justification length that can never be relaxed by configuration.
pub const REASON_MIN_CHARS_FLOOR: usize = 20;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML content is invalid.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field value fails fail-closed validation.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Tunables for the grant engine and expiry sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Minimum number of characters required in a grant justification.
    pub min_reason_chars: usize,

    /// Duration granted when the requester does not ask for one, in hours.
    /// Still clamped by the per-level policy maximum.
    pub default_duration_hours: u64,

    /// Interval between sweeper passes, in seconds.
    pub sweep_interval_secs: u64,

    /// Maximum grants transitioned per sweeper page.
    pub sweep_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_reason_chars: REASON_MIN_CHARS_FLOOR,
            default_duration_hours: 4,
            sweep_interval_secs: 60,
            sweep_page_size: 100,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if a value would weaken the
    /// justification requirement or stall the sweeper.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_reason_chars < REASON_MIN_CHARS_FLOOR {
            return Err(ConfigError::Validation(format!(
                "min_reason_chars must be at least {REASON_MIN_CHARS_FLOOR}, got {}",
                self.min_reason_chars
            )));
        }
        if self.default_duration_hours == 0 {
            return Err(ConfigError::Validation(
                "default_duration_hours must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.sweep_page_size == 0 {
            return Err(ConfigError::Validation(
                "sweep_page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the sweep interval as a [`Duration`].
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
