//! Process-wide settings with layered loading.
//!
//! Settings are built once at startup and handed to the session; nothing
//! reads them from ambient global state. Loading uses figment:
//!
//! 1. Environment variables (QUARRY_*)
//! 2. TOML config file (if QUARRY_CONFIG_FILE set)
//! 3. Built-in defaults

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Which cache backend the coordinator talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// Process-local map.
    Memory,
    /// Shared store at `cache_address`, visible to every process using it.
    Networked,
}

/// Cache and execution settings.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (QUARRY_*)
/// 2. TOML config file (if QUARRY_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Cache every query that does not opt out, using the default TTL.
    ///
    /// Set via QUARRY_CACHE_ENABLED environment variable.
    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// Set via QUARRY_CACHE_BACKEND (`memory` or `networked`).
    #[serde(default = "default_backend")]
    pub cache_backend: CacheBackendKind,

    /// Location of the shared cache store; unused by the memory backend.
    ///
    /// Set via QUARRY_CACHE_ADDRESS environment variable.
    #[serde(default = "default_cache_address")]
    pub cache_address: String,

    /// TTL applied when a query enables caching without one.
    ///
    /// Set via QUARRY_DEFAULT_TTL_SECS environment variable.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Propagate cache failures instead of degrading to storage.
    ///
    /// Set via QUARRY_STRICT_CACHE environment variable.
    #[serde(default)]
    pub strict_cache: bool,

    /// Per-call timeout for storage and cache round trips, in milliseconds.
    ///
    /// Set via QUARRY_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_backend() -> CacheBackendKind {
    CacheBackendKind::Memory
}

fn default_cache_address() -> String {
    "./quarry-cache.sqlite".into()
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_timeout_ms() -> u64 {
    5_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_backend: default_backend(),
            cache_address: default_cache_address(),
            default_ttl_secs: default_ttl_secs(),
            strict_cache: false,
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Build validated settings from the four cache knobs; everything else keeps
/// its default.
///
/// TTLs are stored in whole seconds, so a `default_ttl` with a sub-second part
/// is rejected rather than truncated.
pub fn configure(
    cache_enabled: bool, cache_backend: CacheBackendKind, cache_address: impl Into<String>, default_ttl: Duration,
) -> Result<Settings, ConfigError> {
    if default_ttl.subsec_nanos() != 0 {
        return Err(ConfigError::Invalid {
            field: "default_ttl_secs".into(),
            reason: format!("must be a whole number of seconds, got {default_ttl:?}"),
        });
    }
    let settings = Settings {
        cache_enabled,
        cache_backend,
        cache_address: cache_address.into(),
        default_ttl_secs: default_ttl.as_secs(),
        ..Settings::default()
    };
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Timeout as Duration for use with tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("QUARRY_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("QUARRY_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into()),
        );

        let settings: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        settings.validate()?;

        Ok(settings)
    }
}
