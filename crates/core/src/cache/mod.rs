//! SQLite-backed, schema-versioned key-value cache.
//!
//! This module provides a persistent cache with per-store TTL expiration
//! using SQLite with async access via tokio-rusqlite. It supports:
//!
//! - Deterministic keys derived from structured parameters
//! - Schema reconciliation keyed on a version number
//! - Bulk pruning of expired entries
//! - Destructive reset when the container is corrupted

pub mod connection;
pub mod engine;
pub mod entry;
pub mod expiration;
pub mod fingerprint;
pub mod migrations;
pub mod query;
pub mod schema;
pub mod tables;

pub use crate::Error;

pub use connection::{CacheDb, Location};
pub use engine::{Cache, PruneScope, StoreStats};
pub use entry::{CacheEntry, Lookup, RawEntry};
pub use expiration::{ExpirationPolicy, parse_duration};
pub use query::{Order, Query};
pub use schema::{ExtraStore, FeatureFlags, IndexShape, Schema};
