//! Core types and shared functionality for cachet.
//!
//! This crate provides:
//! - Cache engine with SQLite backend
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;

pub use cache::{Cache, CacheEntry, Lookup, Order, PruneScope, Query};
pub use config::CacheConfig;
pub use error::{Error, ErrorKind};
