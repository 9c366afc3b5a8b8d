//! Cache configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (CACHET_*)
//! 2. TOML config file (if CACHET_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::expiration::{DEFAULT_KEY, FALLBACK_TTL};
use crate::cache::{ExtraStore, FeatureFlags, Location};

mod validation;

pub use validation::ConfigError;

/// Cache configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (CACHET_*)
/// 2. TOML config file (if CACHET_CONFIG_FILE set)
/// 3. Built-in defaults
///
/// Per-store expirations are easiest to set from TOML:
///
/// ```toml
/// namespace = "wallet"
/// schema_version = 3
///
/// [expiration]
/// default = "1h"
/// "algod/transaction-params" = "30s"
/// "nfd/lookup" = "1d"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Name of the physical container (`<data_dir>/<namespace>.sqlite`).
    ///
    /// Set via CACHET_NAMESPACE environment variable.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Directory holding cache containers.
    ///
    /// Set via CACHET_DATA_DIR environment variable.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Keep the container in memory instead of on disk.
    #[serde(default)]
    pub in_memory: bool,

    /// Version of the store layout; bump whenever stores or shapes change.
    ///
    /// Set via CACHET_SCHEMA_VERSION environment variable.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Store name to duration string, plus a `default` entry.
    #[serde(default = "default_expiration")]
    pub expiration: BTreeMap<String, String>,

    /// Log a warning each time a lookup hides an expired entry.
    ///
    /// Set via CACHET_LOG_EXPIRATION environment variable.
    #[serde(default)]
    pub log_expiration: bool,

    /// Optional feature areas contributing built-in stores.
    #[serde(default)]
    pub features: FeatureFlags,

    /// Caller-declared stores merged below the built-ins.
    #[serde(default)]
    pub extra_stores: Vec<ExtraStore>,
}

fn default_namespace() -> String {
    "cachet".into()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_schema_version() -> u32 {
    1
}

fn default_expiration() -> BTreeMap<String, String> {
    BTreeMap::from([(DEFAULT_KEY.to_string(), FALLBACK_TTL.to_string())])
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            data_dir: default_data_dir(),
            in_memory: false,
            schema_version: default_schema_version(),
            expiration: default_expiration(),
            log_expiration: false,
            features: FeatureFlags::default(),
            extra_stores: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Default configuration backed by an in-memory container.
    pub fn in_memory() -> Self {
        Self { in_memory: true, ..Default::default() }
    }

    /// Where the container for this configuration lives.
    pub fn location(&self) -> Location {
        if self.in_memory { Location::Memory } else { Location::for_namespace(&self.data_dir, &self.namespace) }
    }

    /// Set the TTL for one store (or `default`).
    pub fn with_expiration(mut self, store: impl Into<String>, ttl: impl Into<String>) -> Self {
        self.expiration.insert(store.into(), ttl.into());
        self
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `CACHET_`
    /// 2. TOML file from `CACHET_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("CACHET_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("CACHET_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
