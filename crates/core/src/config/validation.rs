//! Settings validation rules.
//!
//! Applied after settings are loaded from environment, files, or defaults.

use thiserror::Error;

use crate::config::{CacheBackendKind, Settings};

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl Settings {
    /// Validate settings values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `default_ttl_secs` is 0
    /// - `timeout_ms` is 0 or exceeds 5 minutes
    /// - `cache_address` is empty while the networked backend is selected
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "default_ttl_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be greater than 0".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.cache_backend == CacheBackendKind::Networked && self.cache_address.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "cache_address".into(),
                reason: "required for the networked backend".into(),
            });
        }

        if !self.cache_enabled && self.strict_cache {
            tracing::warn!("strict_cache is set but cache_enabled is false; strict mode only affects opted-in queries");
        }

        Ok(())
    }
}
