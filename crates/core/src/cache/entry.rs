//! Cache entries and lookup results.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Error;

/// A stored cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// Normalized key fields (object fields replaced by fingerprints).
    pub key: Map<String, Value>,
    /// Payload; `null` represents a cached negative result.
    pub data: T,
    /// Write time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Entry with an undecoded JSON payload, as read from the table store.
pub type RawEntry = CacheEntry<Value>;

impl RawEntry {
    /// Decode the payload into a concrete type.
    pub fn decode<T: DeserializeOwned>(self) -> Result<CacheEntry<T>, Error> {
        Ok(CacheEntry { key: self.key, data: serde_json::from_value(self.data)?, timestamp: self.timestamp })
    }
}

/// Result of a lookup; the shape depends on whether a limit was given.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// No limit: the first matching entry, if any.
    Single(Option<CacheEntry<T>>),
    /// With a limit: up to `limit` matching entries, in order.
    Many(Vec<CacheEntry<T>>),
}

impl<T> Lookup<T> {
    /// First entry regardless of shape.
    pub fn into_first(self) -> Option<CacheEntry<T>> {
        match self {
            Lookup::Single(entry) => entry,
            Lookup::Many(entries) => entries.into_iter().next(),
        }
    }

    /// All entries regardless of shape.
    pub fn into_vec(self) -> Vec<CacheEntry<T>> {
        match self {
            Lookup::Single(entry) => entry.into_iter().collect(),
            Lookup::Many(entries) => entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Lookup::Single(entry) => entry.is_none(),
            Lookup::Many(entries) => entries.is_empty(),
        }
    }
}
