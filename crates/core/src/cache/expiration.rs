//! Per-store time-to-live resolution.
//!
//! Durations are written as an integer magnitude followed by a single unit
//! suffix: `s`, `m`, `h`, `d` or `w` (`"90s"`, `"1h"`, `"2w"`).

use std::collections::{BTreeMap, HashMap};

use chrono::Duration;

use crate::Error;

/// Key in the expiration map that holds the fallback duration.
pub const DEFAULT_KEY: &str = "default";

/// TTL applied when the configuration carries no `default` entry.
pub const FALLBACK_TTL: &str = "1h";

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse a compact duration string such as `"2s"` or `"1w"`.
///
/// # Errors
///
/// Returns `Error::InvalidDuration` for an empty magnitude, a non-numeric
/// magnitude, an unknown suffix, or a value that overflows.
pub fn parse_duration(input: &str) -> Result<Duration, Error> {
    let invalid = || Error::InvalidDuration(input.to_string());
    let trimmed = input.trim();
    let unit = trimmed.chars().last().ok_or_else(invalid)?;
    let magnitude = &trimmed[..trimmed.len() - unit.len_utf8()];

    if magnitude.is_empty() || !magnitude.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let n: i64 = magnitude.parse().map_err(|_| invalid())?;

    let seconds_per_unit: i64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        'w' => 7 * 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    n.checked_mul(seconds_per_unit)
        .and_then(Duration::try_seconds)
        .ok_or_else(invalid)
}

/// Resolved expiration policy, immutable for the lifetime of a cache.
#[derive(Debug, Clone)]
pub struct ExpirationPolicy {
    default: Duration,
    per_store: HashMap<String, Duration>,
    log_expiration: bool,
}

impl ExpirationPolicy {
    /// Build a policy from a `store name -> duration string` map.
    ///
    /// The `default` key, if present, becomes the fallback TTL; otherwise
    /// [`FALLBACK_TTL`] applies.
    pub fn from_map(expiration: &BTreeMap<String, String>, log_expiration: bool) -> Result<Self, Error> {
        let mut default = parse_duration(FALLBACK_TTL)?;
        let mut per_store = HashMap::with_capacity(expiration.len());

        for (store, raw) in expiration {
            let ttl = parse_duration(raw)?;
            if store == DEFAULT_KEY {
                default = ttl;
            } else {
                per_store.insert(store.clone(), ttl);
            }
        }

        Ok(Self { default, per_store, log_expiration })
    }

    /// TTL for the given store, falling back to the default.
    pub fn resolve_ttl(&self, store: &str) -> Duration {
        self.per_store.get(store).copied().unwrap_or(self.default)
    }

    /// True iff `timestamp + ttl(store) < now`.
    pub fn is_expired(&self, store: &str, timestamp_ms: i64, now_ms: i64) -> bool {
        timestamp_ms.saturating_add(self.resolve_ttl(store).num_milliseconds()) < now_ms
    }

    /// Oldest timestamp still considered fresh at `now_ms`.
    pub fn cutoff(&self, store: &str, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.resolve_ttl(store).num_milliseconds())
    }

    /// Report that an expired entry was hidden from a lookup.
    pub fn observe_expired(&self, store: &str) {
        if self.log_expiration {
            tracing::warn!(store, "Cache entry expired");
        }
    }
}
