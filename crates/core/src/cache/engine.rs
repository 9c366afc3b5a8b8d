//! The public cache engine.
//!
//! [`Cache`] composes the schema registry, the expiration policy and the
//! SQLite table store. Its operations never fail towards the caller: every
//! caching-layer error is logged and turned into a miss, a dropped write or
//! an empty report. Errors classified as corruption additionally trigger a
//! destructive reset of the namespace's container, which is recreated empty
//! by the next operation.
//!
//! Operations hold a read lock on the container slot for their whole
//! duration; a reset takes the write lock, so it never interleaves with an
//! in-flight read or write.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{RwLock, RwLockReadGuard};

use super::connection::{CacheDb, Location};
use super::entry::{CacheEntry, Lookup, RawEntry};
use super::expiration::{ExpirationPolicy, now_ms};
use super::fingerprint::{canonical_json, normalize_key};
use super::query::Query;
use super::schema::{IndexShape, Schema, is_field_name};
use super::tables::{Condition, Ordering, TIMESTAMP_FIELD};
use crate::config::CacheConfig;
use crate::{Error, ErrorKind};

/// Which stores a prune sweeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneScope {
    All,
    Stores(Vec<String>),
}

impl From<&str> for PruneScope {
    fn from(store: &str) -> Self {
        PruneScope::Stores(vec![store.to_string()])
    }
}

impl From<String> for PruneScope {
    fn from(store: String) -> Self {
        PruneScope::Stores(vec![store])
    }
}

impl<S: Into<String>> From<Vec<S>> for PruneScope {
    fn from(stores: Vec<S>) -> Self {
        PruneScope::Stores(stores.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> From<Option<Vec<S>>> for PruneScope {
    fn from(stores: Option<Vec<S>>) -> Self {
        stores.map_or(PruneScope::All, PruneScope::from)
    }
}

/// Per-store summary returned by [`Cache::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub store: String,
    pub entries: u64,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
    pub ttl_ms: i64,
}

/// Container handle plus a counter bumped on every (re)open.
struct Slot {
    db: Option<CacheDb>,
    generation: u64,
}

impl Slot {
    fn db(&self) -> Result<&CacheDb, Error> {
        self.db
            .as_ref()
            .ok_or_else(|| Error::Database(tokio_rusqlite::Error::ConnectionClosed))
    }
}

/// Persistent, schema-versioned cache with per-store TTLs.
pub struct Cache {
    namespace: String,
    location: Location,
    version: u32,
    schema: Schema,
    policy: Arc<ExpirationPolicy>,
    slot: RwLock<Slot>,
}

impl Cache {
    /// Resolve the schema and expiration policy from `config` and open the
    /// container, recreating it if it is unusable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the container
    /// cannot be opened for a reason other than corruption.
    pub async fn init(config: &CacheConfig) -> Result<Self, Error> {
        config.validate()?;
        let schema = Schema::resolve(config.features, &config.extra_stores)?;
        let policy = ExpirationPolicy::from_map(&config.expiration, config.log_expiration)?;

        let cache = Self {
            namespace: config.namespace.clone(),
            location: config.location(),
            version: config.schema_version,
            schema,
            policy: Arc::new(policy),
            slot: RwLock::new(Slot { db: None, generation: 0 }),
        };
        drop(cache.acquire().await?);

        tracing::info!(
            namespace = %cache.namespace,
            version = cache.version,
            stores = cache.schema.len(),
            "Cache initialized"
        );
        Ok(cache)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn schema_version(&self) -> u32 {
        self.version
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Names of every store in the resolved schema.
    pub fn stores(&self) -> impl Iterator<Item = &str> {
        self.schema.names()
    }

    /// TTL of a store, or `None` if the store is unknown.
    pub fn ttl(&self, store: &str) -> Option<Duration> {
        self.schema.get(store).map(|_| self.policy.resolve_ttl(store))
    }

    /// Look up entries in `store`.
    ///
    /// Without a limit the result is [`Lookup::Single`] holding the first
    /// match; with a limit it is [`Lookup::Many`]. Entries whose payload
    /// does not decode into `T` are skipped and do not count towards the
    /// limit.
    pub async fn find<T: DeserializeOwned>(&self, store: &str, query: Query) -> Lookup<T> {
        let limit = query.limit;
        let rows = self
            .with_db("find", store, |db| self.select(db, store, query, decodes::<T>))
            .await
            .unwrap_or_default();

        let entries: Vec<CacheEntry<T>> = rows
            .into_iter()
            .filter_map(|row| match row.decode() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(store, error = %e, "Cached payload does not match the requested type");
                    None
                }
            })
            .collect();

        match limit {
            Some(_) => Lookup::Many(entries),
            None => Lookup::Single(entries.into_iter().next()),
        }
    }

    /// First visible entry matching `query`, ignoring any limit it carries.
    pub async fn find_one<T: DeserializeOwned>(&self, store: &str, query: Query) -> Option<CacheEntry<T>> {
        self.find(store, Query { limit: None, ..query }).await.into_first()
    }

    /// Up to `limit` visible entries matching `query`.
    pub async fn find_many<T: DeserializeOwned>(&self, store: &str, query: Query, limit: usize) -> Vec<CacheEntry<T>> {
        self.find(store, query.limit(limit)).await.into_vec()
    }

    /// Upsert `data` under `key` in `store`, stamped with the current time.
    ///
    /// `key` must serialize to an object holding at least the fields of the
    /// store's first index. Failures are logged and the write is dropped.
    pub async fn save<T, K>(&self, store: &str, data: &T, key: &K)
    where
        T: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        self.save_at(store, data, key, now_ms()).await;
    }

    async fn save_at<T, K>(&self, store: &str, data: &T, key: &K, timestamp: i64)
    where
        T: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        let (pk, key_json, data_json) = match self.prepare_write(store, data, key) {
            Ok(prepared) => prepared,
            Err(e) => return self.report("save", store, e, None).await,
        };

        self.with_db("save", store, |db| async move {
            db.upsert_entry(store, pk, key_json, data_json, timestamp).await
        })
        .await;
    }

    /// Delete every entry older than its store's TTL.
    ///
    /// Returns the number of removed entries per store; stores with nothing
    /// removed are omitted. Unknown store names are logged and skipped.
    pub async fn prune(&self, scope: impl Into<PruneScope>) -> BTreeMap<String, u64> {
        let targets: Vec<String> = match scope.into() {
            PruneScope::All => self.schema.names().map(str::to_string).collect(),
            PruneScope::Stores(stores) => stores,
        };
        let now = now_ms();
        let mut removed = BTreeMap::new();

        for store in targets {
            if self.schema.get(&store).is_none() {
                self.report("prune", &store, Error::StoreNotFound(store.clone()), None)
                    .await;
                continue;
            }

            let cutoff = self.policy.cutoff(&store, now);
            let name = store.as_str();
            let count = self
                .with_db("prune", name, |db| async move { db.delete_older_than(name, cutoff).await })
                .await;

            if let Some(count) = count.filter(|c| *c > 0) {
                tracing::debug!(store = %store, count, "Pruned expired cache entries");
                removed.insert(store, count);
            }
        }
        removed
    }

    /// Delete entries matching an equality descriptor.
    ///
    /// Returns the number of removed entries; an empty descriptor is
    /// rejected rather than clearing the store.
    pub async fn delete(&self, store: &str, criteria: Value) -> u64 {
        let conditions = match self
            .schema
            .require(store)
            .and_then(|shape| conditions(shape, &criteria))
        {
            Ok(c) if c.is_empty() => {
                let err = Error::InvalidInput("delete requires at least one key field".into());
                self.report("delete", store, err, None).await;
                return 0;
            }
            Ok(c) => c,
            Err(e) => {
                self.report("delete", store, e, None).await;
                return 0;
            }
        };

        self.with_db("delete", store, |db| async move { db.delete_matching(store, conditions).await })
            .await
            .unwrap_or(0)
    }

    /// Entry counts and timestamp ranges for every store.
    pub async fn stats(&self) -> Vec<StoreStats> {
        let mut stats = Vec::with_capacity(self.schema.len());
        for (store, _) in self.schema.iter() {
            let table = self
                .with_db("stats", store, |db| async move { db.table_stats(store).await })
                .await;
            if let Some(table) = table {
                stats.push(StoreStats {
                    store: store.to_string(),
                    entries: table.entries,
                    oldest: table.oldest,
                    newest: table.newest,
                    ttl_ms: self.policy.resolve_ttl(store).num_milliseconds(),
                });
            }
        }
        stats
    }

    /// Close the container, waiting for in-flight operations to finish.
    pub async fn close(self) -> Result<(), Error> {
        match self.slot.into_inner().db {
            Some(db) => db.close().await,
            None => Ok(()),
        }
    }

    /// Destroy the container; the next operation recreates it empty.
    pub async fn reset(&self) -> Result<(), Error> {
        self.recover(None).await
    }

    async fn select(
        &self, db: CacheDb, store: &str, query: Query, fits: fn(&Value) -> bool,
    ) -> Result<Vec<RawEntry>, Error> {
        let shape = self.schema.require(store)?;
        let conditions = match &query.criteria {
            Some(criteria) => conditions(shape, criteria)?,
            None => Vec::new(),
        };
        let ordering = match query.order_by {
            Some(field) if field == TIMESTAMP_FIELD || is_field_name(&field) => {
                Some(Ordering { field, order: query.order })
            }
            Some(field) => return Err(Error::InvalidInput(format!("cannot order by {field:?}"))),
            None => None,
        };

        let policy = Arc::clone(&self.policy);
        let store_name = store.to_string();
        let filter = query.filter;
        let include_expired = query.include_expired;
        let now = now_ms();

        let keep = move |entry: &RawEntry| {
            if let Some(filter) = &filter
                && !filter(entry)
            {
                return false;
            }
            if !include_expired && policy.is_expired(&store_name, entry.timestamp, now) {
                policy.observe_expired(&store_name);
                return false;
            }
            if !fits(&entry.data) {
                tracing::warn!(store = %store_name, "Cached payload does not match the requested type");
                return false;
            }
            true
        };

        db.select_entries(store, conditions, ordering, query.limit.unwrap_or(1), keep)
            .await
    }

    fn prepare_write<T, K>(&self, store: &str, data: &T, key: &K) -> Result<(String, String, String), Error>
    where
        T: Serialize + ?Sized,
        K: Serialize + ?Sized,
    {
        let shape = self.schema.require(store)?;
        let Value::Object(fields) = serde_json::to_value(key)? else {
            return Err(Error::InvalidInput("key fields must be an object".into()));
        };
        let normalized = normalize_key(&fields);
        let pk = shape.primary_key(&normalized)?;
        let key_json = canonical_json(&Value::Object(normalized));
        let data_json = serde_json::to_string(data)?;
        Ok((pk, key_json, data_json))
    }

    /// Read-lock the slot, opening the container first if needed.
    async fn acquire(&self) -> Result<RwLockReadGuard<'_, Slot>, Error> {
        {
            let slot = self.slot.read().await;
            if slot.db.is_some() {
                return Ok(slot);
            }
        }

        let mut slot = self.slot.write().await;
        if slot.db.is_none() {
            slot.db = Some(self.open_container().await?);
            slot.generation += 1;
        }
        Ok(slot.downgrade())
    }

    async fn open_container(&self) -> Result<CacheDb, Error> {
        match CacheDb::open(&self.location, &self.schema, self.version).await {
            Err(e) if e.is_corruption() => {
                tracing::warn!(
                    namespace = %self.namespace,
                    error = %e,
                    "Cache container unusable, recreating it empty"
                );
                self.location.destroy().await?;
                CacheDb::open(&self.location, &self.schema, self.version).await
            }
            result => result,
        }
    }

    /// Run `f` against the open container under the read lock, reporting
    /// any failure after the lock is released.
    async fn with_db<T, F, Fut>(&self, operation: &'static str, store: &str, f: F) -> Option<T>
    where
        F: FnOnce(CacheDb) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let (result, generation) = match self.acquire().await {
            Ok(slot) => {
                let result = match slot.db() {
                    Ok(db) => f(db.clone()).await,
                    Err(e) => Err(e),
                };
                (result, Some(slot.generation))
            }
            Err(e) => (Err(e), None),
        };

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.report(operation, store, e, generation).await;
                None
            }
        }
    }

    async fn report(&self, operation: &'static str, store: &str, err: Error, generation: Option<u64>) {
        match err.kind() {
            ErrorKind::NotFound => tracing::warn!(store, operation, "Cache store not found"),
            ErrorKind::Invalid => tracing::warn!(store, operation, error = %err, "Cache request rejected"),
            ErrorKind::Storage => tracing::warn!(store, operation, error = %err, "Cache operation failed"),
            ErrorKind::Corruption => {
                tracing::warn!(store, operation, error = %err, "Cache schema corruption detected");
                if let Err(e) = self.recover(generation).await {
                    tracing::warn!(namespace = %self.namespace, error = %e, "Cache reset failed");
                }
            }
        }
    }

    /// Drop the container. When `observed` names the generation that hit
    /// the failure, a container reopened since then is left alone.
    async fn recover(&self, observed: Option<u64>) -> Result<(), Error> {
        let mut slot = self.slot.write().await;
        if let Some(generation) = observed
            && (slot.db.is_none() || slot.generation != generation)
        {
            tracing::debug!(namespace = %self.namespace, "Cache container already reset");
            return Ok(());
        }

        if let Some(db) = slot.db.take()
            && let Err(e) = db.close().await
        {
            tracing::debug!(error = %e, "Closing cache container failed");
        }
        self.location.destroy().await?;

        tracing::warn!(namespace = %self.namespace, "Cache container reset");
        Ok(())
    }
}

fn decodes<T: DeserializeOwned>(data: &Value) -> bool {
    <T as Deserialize<'_>>::deserialize(data).is_ok()
}

fn conditions(shape: &IndexShape, criteria: &Value) -> Result<Vec<Condition>, Error> {
    let Value::Object(fields) = criteria else {
        return Err(Error::InvalidInput("where descriptor must be an object".into()));
    };

    normalize_key(fields)
        .into_iter()
        .map(|(field, value)| {
            if !is_field_name(&field) {
                return Err(Error::InvalidInput(format!("invalid key field {field:?}")));
            }
            let multi = shape.is_multi(&field);
            Ok(Condition { field, value, multi })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::query::Order;
    use crate::cache::schema::{ExtraStore, FeatureFlags};
    use crate::cache::tables::quote_ident;
    use serde_json::json;

    const ASSETS: &str = "algod/asset";
    const NAMES: &str = "nfd/lookup";

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Asset {
        name: String,
        decimals: u32,
    }

    fn asset(name: &str) -> Asset {
        Asset { name: name.to_string(), decimals: 6 }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            features: FeatureFlags { indexer: false, names: true, media: false },
            extra_stores: vec![ExtraStore::Name("app/prices".into())],
            ..CacheConfig::in_memory()
        }
        .with_expiration("default", "1h")
        .with_expiration(ASSETS, "10s")
    }

    async fn cache() -> Cache {
        Cache::init(&config()).await.unwrap()
    }

    async fn drop_table(cache: &Cache, store: &'static str) {
        let slot = cache.slot.read().await;
        slot.db()
            .unwrap()
            .conn
            .call(move |conn| conn.execute_batch(&format!("DROP TABLE {}", quote_ident(store))))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_key_determinism() {
        let cache = cache().await;
        cache
            .save(ASSETS, &asset("USDC"), &json!({"id": 5, "params": {"a": 1, "b": 2}}))
            .await;

        let found: Option<CacheEntry<Asset>> = cache
            .find_one(ASSETS, Query::new().matching(json!({"id": 5, "params": {"b": 2, "a": 1}})))
            .await;
        assert_eq!(found.unwrap().data, asset("USDC"));

        let other: Option<CacheEntry<Asset>> = cache
            .find_one(ASSETS, Query::new().matching(json!({"id": 5, "params": {"a": 1}})))
            .await;
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_null_fields_are_absent() {
        let cache = cache().await;
        cache
            .save(ASSETS, &asset("ALGO"), &json!({"id": 0, "params": null}))
            .await;

        let found: Option<CacheEntry<Asset>> = cache.find_one(ASSETS, Query::new().matching(json!({"id": 0}))).await;
        let entry = found.unwrap();
        assert!(!entry.key.contains_key("params"));
    }

    #[tokio::test]
    async fn test_overwrite_keeps_latest() {
        let cache = cache().await;
        let key = json!({"id": 31566704, "params": {"round": 1}});
        cache.save_at(ASSETS, &asset("old"), &key, now_ms() - 500).await;
        cache.save(ASSETS, &asset("new"), &key).await;

        let all: Vec<CacheEntry<Asset>> = cache.find_many(ASSETS, Query::new(), 10).await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].data, asset("new"));
    }

    #[tokio::test]
    async fn test_expired_entries_hidden_unless_requested() {
        let cache = cache().await;
        let now = now_ms();
        cache.save_at(ASSETS, &asset("fresh"), &json!({"id": 1}), now - 9_000).await;
        cache.save_at(ASSETS, &asset("stale"), &json!({"id": 2}), now - 11_000).await;

        let visible: Vec<CacheEntry<Asset>> = cache.find_many(ASSETS, Query::new(), 10).await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].data, asset("fresh"));

        let stale: Option<CacheEntry<Asset>> = cache.find_one(ASSETS, Query::new().matching(json!({"id": 2}))).await;
        assert!(stale.is_none());

        let stale: Option<CacheEntry<Asset>> = cache
            .find_one(ASSETS, Query::new().matching(json!({"id": 2})).include_expired())
            .await;
        assert_eq!(stale.unwrap().data, asset("stale"));
    }

    #[tokio::test]
    async fn test_limit_order_and_filter() {
        let cache = cache().await;
        for id in 1..=5 {
            cache.save(ASSETS, &asset(&format!("A{id}")), &json!({"id": id})).await;
        }

        let single = cache.find::<Asset>(ASSETS, Query::new()).await;
        assert!(matches!(single, Lookup::Single(Some(_))));

        let many = cache
            .find::<Asset>(ASSETS, Query::new().order_by("id").order(Order::Desc).limit(3))
            .await;
        let Lookup::Many(entries) = many else { panic!("expected a sequence") };
        let ids: Vec<i64> = entries.iter().map(|e| e.key["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![5, 4, 3]);

        let odd: Vec<CacheEntry<Asset>> = cache
            .find_many(
                ASSETS,
                Query::new()
                    .order_by("id")
                    .filter(|e| e.key["id"].as_i64().is_some_and(|id| id % 2 == 1)),
                2,
            )
            .await;
        let names: Vec<&str> = odd.iter().map(|e| e.data.name.as_str()).collect();
        assert_eq!(names, vec!["A1", "A3"]);

        let empty = cache.find::<Asset>(ASSETS, Query::new().matching(json!({"id": 99})).limit(5)).await;
        assert_eq!(empty, Lookup::Many(vec![]));
    }

    #[tokio::test]
    async fn test_multi_value_lookup() {
        let cache = cache().await;
        cache
            .save(NAMES, &json!({"name": "alice.algo"}), &json!({"address": "AAA", "tags": ["verified", "avatar"]}))
            .await;
        cache
            .save(NAMES, &json!({"name": "bob.algo"}), &json!({"address": "BBB", "tags": ["avatar"]}))
            .await;

        let verified: Vec<CacheEntry<Value>> =
            cache.find_many(NAMES, Query::new().matching(json!({"tags": "verified"})), 10).await;
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].data["name"], json!("alice.algo"));

        let avatars: Vec<CacheEntry<Value>> = cache
            .find_many(NAMES, Query::new().matching(json!({"tags": "avatar"})).order_by("address"), 10)
            .await;
        assert_eq!(avatars.len(), 2);
    }

    #[tokio::test]
    async fn test_negative_result_roundtrip() {
        let cache = cache().await;
        cache.save(NAMES, &None::<String>, &json!({"address": "NOBODY"})).await;

        let entry: CacheEntry<Option<String>> = cache
            .find_one(NAMES, Query::new().matching(json!({"address": "NOBODY"})))
            .await
            .unwrap();
        assert_eq!(entry.data, None);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let cache = cache().await;
        cache.save(ASSETS, &"not an asset", &json!({"id": 1})).await;
        let found: Option<CacheEntry<Asset>> = cache.find_one(ASSETS, Query::new()).await;
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_rows_do_not_consume_the_limit() {
        let cache = cache().await;
        cache.save(ASSETS, &"not a number", &json!({"id": 1})).await;
        cache.save(ASSETS, &7u32, &json!({"id": 2})).await;

        let first: Option<CacheEntry<u32>> = cache.find_one(ASSETS, Query::new().order_by("id")).await;
        assert_eq!(first.map(|e| e.data), Some(7));

        let many: Vec<CacheEntry<u32>> = cache.find_many(ASSETS, Query::new().order_by("id"), 1).await;
        assert_eq!(many.into_iter().map(|e| e.data).collect::<Vec<_>>(), vec![7]);
    }

    #[tokio::test]
    async fn test_large_integer_keys_stay_distinct() {
        let cache = cache().await;
        cache.save(ASSETS, &1u32, &json!({"id": u64::MAX})).await;
        cache.save(ASSETS, &2u32, &json!({"id": u64::MAX - 1})).await;

        for (id, expected) in [(u64::MAX, 1u32), (u64::MAX - 1, 2)] {
            let found: Vec<CacheEntry<u32>> =
                cache.find_many(ASSETS, Query::new().matching(json!({"id": id})), 10).await;
            assert_eq!(found.into_iter().map(|e| e.data).collect::<Vec<_>>(), vec![expected]);
        }
    }

    #[tokio::test]
    async fn test_store_names_do_not_collide_with_index_names() {
        let config = CacheConfig {
            extra_stores: vec![
                ExtraStore::Name("algod/asset__id".into()),
                ExtraStore::Name("algod/asset__timestamp".into()),
            ],
            ..CacheConfig::in_memory()
        };
        let cache = Cache::init(&config).await.unwrap();

        cache.save("algod/asset__id", &3u32, &json!({"params": {"a": 1}})).await;
        let found: Option<CacheEntry<u32>> = cache.find_one("algod/asset__id", Query::new()).await;
        assert_eq!(found.map(|e| e.data), Some(3));
    }

    #[tokio::test]
    async fn test_invalid_requests_are_swallowed() {
        let cache = cache().await;
        // Missing required field, non-object key, bad order field.
        cache.save(ASSETS, &asset("x"), &json!({"params": {"a": 1}})).await;
        cache.save(ASSETS, &asset("x"), &json!(5)).await;
        let bad_order = cache.find::<Asset>(ASSETS, Query::new().order_by("id; DROP")).await;
        assert_eq!(bad_order, Lookup::Single(None));
        assert!(cache.find_one::<Asset>(ASSETS, Query::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_store() {
        let cache = cache().await;
        cache.save("nope/store", &1, &json!({"params": {}})).await;
        assert_eq!(cache.find::<u32>("nope/store", Query::new()).await, Lookup::Single(None));
        assert_eq!(cache.find::<u32>("nope/store", Query::new().limit(2)).await, Lookup::Many(vec![]));
        assert!(cache.prune("nope/store").await.is_empty());
        assert_eq!(cache.delete("nope/store", json!({"id": 1})).await, 0);
        assert!(cache.ttl("nope/store").is_none());
    }

    #[tokio::test]
    async fn test_prune_removes_only_stale_entries() {
        let cache = cache().await;
        let now = now_ms();
        cache.save_at(ASSETS, &asset("stale"), &json!({"id": 1}), now - 60_000).await;
        cache.save_at(ASSETS, &asset("fresh"), &json!({"id": 2}), now).await;
        cache.save_at("app/prices", &1.5, &json!({"params": {"pair": "ALGO/USD"}}), now - 60_000).await;
        cache.save_at("app/prices", &0.9, &json!({"params": {"pair": "ALGO/EUR"}}), now - 7_200_000).await;

        let removed = cache.prune(PruneScope::All).await;
        assert_eq!(removed, BTreeMap::from([(ASSETS.to_string(), 1), ("app/prices".to_string(), 1)]));

        for stats in cache.stats().await {
            if let Some(oldest) = stats.oldest {
                assert!(oldest >= now - stats.ttl_ms, "{} kept a stale entry", stats.store);
            }
        }
        assert!(cache.prune(PruneScope::All).await.is_empty());
    }

    #[tokio::test]
    async fn test_prune_named_stores() {
        let cache = cache().await;
        let stale = now_ms() - 60_000;
        cache.save_at(ASSETS, &asset("stale"), &json!({"id": 1}), stale).await;
        cache.save_at("app/prices", &1.0, &json!({"params": {"p": 1}}), now_ms() - 7_200_000).await;

        let removed = cache.prune(vec!["app/prices", "nope/store"]).await;
        assert_eq!(removed.get("app/prices"), Some(&1));
        assert!(!removed.contains_key(ASSETS));

        let removed = cache.prune(ASSETS).await;
        assert_eq!(removed.get(ASSETS), Some(&1));
    }

    #[tokio::test]
    async fn test_delete_and_stats() {
        let cache = cache().await;
        cache.save(NAMES, &json!({}), &json!({"address": "AAA", "tags": ["x"]})).await;
        cache.save(NAMES, &json!({}), &json!({"address": "BBB", "tags": ["y"]})).await;

        assert_eq!(cache.delete(NAMES, json!({"tags": "x"})).await, 1);
        assert_eq!(cache.delete(NAMES, json!({})).await, 0);

        let stats = cache.stats().await;
        assert_eq!(stats.len(), cache.schema().len());
        let names = stats.iter().find(|s| s.store == NAMES).unwrap();
        assert_eq!(names.entries, 1);
        assert_eq!(names.ttl_ms, 3_600_000);
    }

    #[tokio::test]
    async fn test_corruption_resets_in_memory_container() {
        let cache = cache().await;
        cache.save(ASSETS, &asset("USDC"), &json!({"id": 1})).await;
        cache.save("app/prices", &1.0, &json!({"params": {"p": 1}})).await;

        drop_table(&cache, ASSETS).await;
        assert!(cache.find_one::<Asset>(ASSETS, Query::new()).await.is_none());

        // Recreated from the schema, empty.
        assert!(cache.find_one::<f64>("app/prices", Query::new()).await.is_none());
        cache.save(ASSETS, &asset("USDC"), &json!({"id": 1})).await;
        let found: Option<CacheEntry<Asset>> = cache.find_one(ASSETS, Query::new()).await;
        assert_eq!(found.unwrap().data, asset("USDC"));
    }

    #[tokio::test]
    async fn test_stale_generation_does_not_reset_twice() {
        let cache = cache().await;
        let first = cache.slot.read().await.generation;
        cache.recover(Some(first)).await.unwrap();
        cache.save(ASSETS, &asset("after"), &json!({"id": 1})).await;

        // A second report from the old generation leaves the new container alone.
        cache.recover(Some(first)).await.unwrap();
        assert!(cache.find_one::<Asset>(ASSETS, Query::new()).await.is_some());
    }

    #[tokio::test]
    async fn test_reset() {
        let cache = cache().await;
        cache.save(ASSETS, &asset("USDC"), &json!({"id": 1})).await;
        cache.reset().await.unwrap();
        assert!(cache.find_one::<Asset>(ASSETS, Query::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_saves() {
        let cache = Arc::new(cache().await);
        let tasks: Vec<_> = (0..20)
            .map(|id| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.save(ASSETS, &asset("c"), &json!({"id": id})).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let all: Vec<CacheEntry<Asset>> = cache.find_many(ASSETS, Query::new(), 100).await;
        assert_eq!(all.len(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_save_racing_reset_is_all_or_nothing() {
        for _ in 0..20 {
            let cache = Arc::new(cache().await);
            let saver = {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.save(ASSETS, &asset("raced"), &json!({"id": 9})).await })
            };
            let resetter = {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.reset().await })
            };
            saver.await.unwrap();
            resetter.await.unwrap().unwrap();

            let all: Vec<CacheEntry<Asset>> = cache.find_many(ASSETS, Query::new().include_expired(), 10).await;
            match all.as_slice() {
                [] => {}
                [entry] => {
                    assert_eq!(entry.data, asset("raced"));
                    assert_eq!(entry.key["id"], json!(9));
                }
                other => panic!("unexpected entries after reset: {other:?}"),
            }

            cache.save(ASSETS, &asset("after"), &json!({"id": 10})).await;
            let after: Option<CacheEntry<Asset>> = cache.find_one(ASSETS, Query::new().matching(json!({"id": 10}))).await;
            assert_eq!(after.map(|e| e.data), Some(asset("after")));
        }
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        let config = CacheConfig::in_memory().with_expiration("default", "forever");
        assert!(Cache::init(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_ttl_lookup() {
        let cache = cache().await;
        assert_eq!(cache.ttl(ASSETS), Some(Duration::seconds(10)));
        assert_eq!(cache.ttl(NAMES), Some(Duration::hours(1)));
        assert_eq!(cache.ttl("nope/store"), None);
    }

    #[tokio::test]
    async fn test_stores_lists_resolved_schema() {
        let cache = cache().await;
        let stores: Vec<&str> = cache.stores().collect();
        assert!(stores.contains(&ASSETS));
        assert!(stores.contains(&NAMES));
        assert!(stores.contains(&"app/prices"));
        assert!(!stores.contains(&"media/asset-image"));
    }
}
