//! Store schema registry.
//!
//! Each logical store declares an index shape using a compact grammar of
//! comma-separated index specs:
//!
//! - `&field` unique single-field index
//! - `field` plain single-field index
//! - `*field` multi-value index over an array field
//! - `[a+b]` compound index
//!
//! Row identity within a store is the combination of every non multi-value
//! field the shape names, so `&id, [id+params]` keys rows by `(id, params)`
//! while `&address, *tags` keys them by `address` alone. The first index's
//! fields must be present in every key.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::fingerprint::{canonical_json, fingerprint};
use crate::Error;

/// Shape assigned to stores declared by name only.
pub const DEFAULT_SHAPE: &str = "&params";

const CHAIN_STORES: &[(&str, &str)] = &[
    ("algod/account", "&params"),
    ("algod/asset", "&id, [id+params]"),
    ("algod/application", "&id, [id+params]"),
    ("algod/transaction-params", "&params"),
];

const INDEXER_STORES: &[(&str, &str)] = &[
    ("indexer/account-transactions", "&params"),
    ("indexer/asset-holders", "&id, [id+params]"),
    ("indexer/transaction", "&id, [id+params]"),
];

const NAMES_STORES: &[(&str, &str)] = &[("nfd/lookup", "&address, *tags"), ("nfd/search", "&params")];

const MEDIA_STORES: &[(&str, &str)] = &[("media/asset-image", "&id, [id+params]")];

/// Optional feature areas that contribute built-in stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Indexer query support.
    #[serde(default)]
    pub indexer: bool,
    /// Naming-service lookups.
    #[serde(default)]
    pub names: bool,
    /// Media (asset image) lookups.
    #[serde(default)]
    pub media: bool,
}

/// A caller-declared store: either a bare name or a name with a shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtraStore {
    Name(String),
    Declared { name: String, shape: String },
}

impl ExtraStore {
    pub fn name(&self) -> &str {
        match self {
            ExtraStore::Name(name) | ExtraStore::Declared { name, .. } => name,
        }
    }

    pub fn shape(&self) -> &str {
        match self {
            ExtraStore::Name(_) => DEFAULT_SHAPE,
            ExtraStore::Declared { shape, .. } => shape,
        }
    }
}

/// One index spec within a shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub fields: Vec<String>,
    pub unique: bool,
    pub multi: bool,
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unique {
            f.write_str("&")?;
        }
        if self.multi {
            f.write_str("*")?;
        }
        if self.fields.len() == 1 {
            f.write_str(&self.fields[0])
        } else {
            write!(f, "[{}]", self.fields.join("+"))
        }
    }
}

/// Parsed index shape of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexShape {
    specs: Vec<IndexSpec>,
}

impl IndexShape {
    /// Parse a shape such as `"&id, [id+params]"`.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::InvalidInput(format!("index shape {input:?}: {reason}"));
        let mut specs = Vec::new();

        for token in input.split(',').map(str::trim) {
            if token.is_empty() {
                return Err(invalid("empty index spec"));
            }
            let (unique, multi, body) = match token.as_bytes()[0] {
                b'&' => (true, false, &token[1..]),
                b'*' => (false, true, &token[1..]),
                _ => (false, false, token),
            };

            let fields: Vec<String> = match body.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
                Some(inner) => inner.split('+').map(|f| f.trim().to_string()).collect(),
                None => vec![body.to_string()],
            };
            if let Some(bad) = fields.iter().find(|f| !is_field_name(f)) {
                return Err(invalid(&format!("invalid field name {bad:?}")));
            }
            if multi && fields.len() > 1 {
                return Err(invalid("compound index cannot be multi-value"));
            }

            specs.push(IndexSpec { fields, unique, multi });
        }

        if specs[0].multi {
            return Err(invalid("first index cannot be multi-value"));
        }

        Ok(Self { specs })
    }

    pub fn specs(&self) -> &[IndexSpec] {
        &self.specs
    }

    /// Fields every key must carry.
    pub fn required_fields(&self) -> &[String] {
        &self.specs[0].fields
    }

    /// Fields that together identify a row.
    pub fn identity_fields(&self) -> BTreeSet<&str> {
        self.specs
            .iter()
            .filter(|s| !s.multi)
            .flat_map(|s| s.fields.iter().map(String::as_str))
            .collect()
    }

    /// Whether `field` is declared as a multi-value index.
    pub fn is_multi(&self, field: &str) -> bool {
        self.specs.iter().any(|s| s.multi && s.fields[0] == field)
    }

    /// Derive the row key from already-normalized key fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if a required field is absent or a
    /// multi-value field is not an array.
    pub fn primary_key(&self, key: &Map<String, Value>) -> Result<String, Error> {
        if let Some(missing) = self.required_fields().iter().find(|f| !key.contains_key(*f)) {
            return Err(Error::InvalidInput(format!("key is missing required field {missing:?}")));
        }
        for spec in self.specs.iter().filter(|s| s.multi) {
            if let Some(value) = key.get(&spec.fields[0])
                && !value.is_array()
            {
                return Err(Error::InvalidInput(format!("field {:?} must be an array", spec.fields[0])));
            }
        }

        let identity: Map<String, Value> = self
            .identity_fields()
            .into_iter()
            .filter_map(|f| key.get(f).map(|v| (f.to_string(), v.clone())))
            .collect();
        Ok(canonical_json(&Value::Object(identity)))
    }
}

impl fmt::Display for IndexShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, spec) in self.specs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{spec}")?;
        }
        Ok(())
    }
}

/// Field names are embedded in JSON paths, so they stay alphanumeric.
pub fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_store_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() || name.starts_with('_') || name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(Error::InvalidInput(format!("invalid store name {name:?}")));
    }
    Ok(())
}

/// Resolved mapping from store name to index shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    stores: BTreeMap<String, IndexShape>,
}

impl Schema {
    /// Assemble the active stores from feature flags and extra stores.
    ///
    /// Built-in stores win over extra stores of the same name.
    pub fn resolve(features: FeatureFlags, extra: &[ExtraStore]) -> Result<Self, Error> {
        let mut stores = BTreeMap::new();

        for store in extra {
            validate_store_name(store.name())?;
            stores.insert(store.name().to_string(), IndexShape::parse(store.shape())?);
        }

        let groups = [
            (true, CHAIN_STORES),
            (features.indexer, INDEXER_STORES),
            (features.names, NAMES_STORES),
            (features.media, MEDIA_STORES),
        ];
        for (name, shape) in groups
            .into_iter()
            .filter(|(enabled, _)| *enabled)
            .flat_map(|(_, group)| group.iter())
        {
            let shape = IndexShape::parse(shape)?;
            if let Some(previous) = stores.insert(name.to_string(), shape) {
                tracing::warn!(store = name, shape = %previous, "Extra store shadowed by built-in store");
            }
        }

        Ok(Self { stores })
    }

    pub fn get(&self, store: &str) -> Option<&IndexShape> {
        self.stores.get(store)
    }

    /// Look up a store, failing with `StoreNotFound`.
    pub fn require(&self, store: &str) -> Result<&IndexShape, Error> {
        self.get(store).ok_or_else(|| Error::StoreNotFound(store.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexShape)> {
        self.stores.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Stable hash of the full mapping, for diagnostics.
    pub fn fingerprint(&self) -> String {
        let rendered: Map<String, Value> = self
            .stores
            .iter()
            .map(|(name, shape)| (name.clone(), Value::String(shape.to_string())))
            .collect();
        fingerprint(&Value::Object(rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_shapes() {
        let shape = IndexShape::parse("&id, [id+params]").unwrap();
        assert_eq!(shape.specs().len(), 2);
        assert!(shape.specs()[0].unique);
        assert_eq!(shape.specs()[1].fields, vec!["id", "params"]);
        assert_eq!(shape.to_string(), "&id, [id+params]");

        let shape = IndexShape::parse("&address,*tags").unwrap();
        assert!(shape.is_multi("tags"));
        assert!(!shape.is_multi("address"));
        assert_eq!(shape.to_string(), "&address, *tags");
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for bad in ["", "&id,", "*tags", "&id, *[a+b]", "&a-b", "[a+]", "&$.x"] {
            assert!(IndexShape::parse(bad).is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn test_primary_key_composite() {
        let shape = IndexShape::parse("&id, [id+params]").unwrap();
        let a = shape.primary_key(&key(json!({"id": 5, "params": "abc"}))).unwrap();
        let b = shape.primary_key(&key(json!({"params": "abc", "id": 5}))).unwrap();
        let c = shape.primary_key(&key(json!({"id": 5, "params": "def"}))).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_primary_key_ignores_multi_and_unknown_fields() {
        let shape = IndexShape::parse("&address, *tags").unwrap();
        let a = shape.primary_key(&key(json!({"address": "A", "tags": ["x"]}))).unwrap();
        let b = shape.primary_key(&key(json!({"address": "A", "tags": ["y"], "extra": 1}))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_primary_key_validation() {
        let shape = IndexShape::parse("&address, *tags").unwrap();
        assert!(shape.primary_key(&key(json!({"tags": ["x"]}))).is_err());
        assert!(shape.primary_key(&key(json!({"address": "A", "tags": "x"}))).is_err());
    }

    #[test]
    fn test_resolve_feature_groups() {
        let base = Schema::resolve(FeatureFlags::default(), &[]).unwrap();
        assert!(base.get("algod/account").is_some());
        assert!(base.get("nfd/lookup").is_none());

        let all = Schema::resolve(FeatureFlags { indexer: true, names: true, media: true }, &[]).unwrap();
        assert!(all.get("indexer/transaction").is_some());
        assert!(all.get("nfd/lookup").is_some());
        assert!(all.get("media/asset-image").is_some());
        assert!(all.len() > base.len());
        assert_ne!(all.fingerprint(), base.fingerprint());
    }

    #[test]
    fn test_builtins_win_over_extra_stores() {
        let extra = vec![
            ExtraStore::Name("app/prices".into()),
            ExtraStore::Declared { name: "algod/account".into(), shape: "&address".into() },
        ];
        let schema = Schema::resolve(FeatureFlags::default(), &extra).unwrap();
        assert_eq!(schema.get("app/prices").unwrap().to_string(), DEFAULT_SHAPE);
        assert_eq!(schema.get("algod/account").unwrap().to_string(), "&params");
    }

    #[test]
    fn test_reserved_store_names_rejected() {
        for name in ["", "_meta", "sqlite_master"] {
            let extra = vec![ExtraStore::Name(name.into())];
            assert!(Schema::resolve(FeatureFlags::default(), &extra).is_err());
        }
    }

    #[test]
    fn test_extra_store_deserialize() {
        let extra: Vec<ExtraStore> =
            serde_json::from_value(json!(["app/a", {"name": "app/b", "shape": "&id"}])).unwrap();
        assert_eq!(extra[0].shape(), DEFAULT_SHAPE);
        assert_eq!(extra[1].name(), "app/b");
        assert_eq!(extra[1].shape(), "&id");
    }
}
