//! Configuration validation rules.
//!
//! This module provides validation logic for `CacheConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::cache::expiration::{DEFAULT_KEY, parse_duration};
use crate::cache::schema::IndexShape;
use crate::config::CacheConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Config(err.to_string())
    }
}

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `namespace` is empty or contains a path separator
    /// - `schema_version` is 0
    /// - `expiration` lacks a `default` entry or holds an unparsable duration
    /// - an extra store has an empty name or an unparsable shape
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ns = self.namespace.trim();
        if ns.is_empty() || ns == "." || ns == ".." || ns.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "namespace".into(),
                reason: "must be a non-empty file name without path separators".into(),
            });
        }

        if self.schema_version == 0 {
            return Err(ConfigError::Invalid { field: "schema_version".into(), reason: "must be at least 1".into() });
        }

        if !self.expiration.contains_key(DEFAULT_KEY) {
            return Err(ConfigError::Invalid {
                field: "expiration".into(),
                reason: "must contain a `default` duration".into(),
            });
        }
        for (store, raw) in &self.expiration {
            if let Err(e) = parse_duration(raw) {
                return Err(ConfigError::Invalid { field: format!("expiration.{store}"), reason: e.to_string() });
            }
        }

        for store in &self.extra_stores {
            if store.name().trim().is_empty() {
                return Err(ConfigError::Invalid { field: "extra_stores".into(), reason: "store name is empty".into() });
            }
            if let Err(e) = IndexShape::parse(store.shape()) {
                return Err(ConfigError::Invalid { field: format!("extra_stores.{}", store.name()), reason: e.to_string() });
            }
        }

        Ok(())
    }
}
