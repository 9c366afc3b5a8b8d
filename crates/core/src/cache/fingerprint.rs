//! Deterministic fingerprints for structured key fields.
//!
//! A fingerprint is the SHA-256 of a canonical JSON rendering in which
//! object keys are sorted, so two structurally equal objects hash the same
//! regardless of the order their keys were inserted. Input is a
//! [`serde_json::Value`], which cannot be cyclic.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Compute the fingerprint of a structured value.
pub fn fingerprint(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// Render a value as compact JSON with object keys in sorted order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            // Map is only sorted while serde_json's `preserve_order` is off,
            // and any crate in the graph can turn it on.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a &str cannot fail.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Normalize the top-level fields of a key or `where` object.
///
/// Null fields are dropped, object-valued fields are replaced by their
/// fingerprint, scalars and arrays pass through. Returns a new map and
/// leaves the input untouched.
pub fn normalize_key(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| {
            let normalized = match value {
                Value::Object(_) => Value::String(fingerprint(value)),
                other => other.clone(),
            };
            (name.clone(), normalized)
        })
        .collect()
}
