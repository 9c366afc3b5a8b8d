//! Lookup descriptors.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::entry::RawEntry;

/// Sort direction for `order_by`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// In-memory predicate evaluated after the index lookup.
pub type EntryFilter = Arc<dyn Fn(&RawEntry) -> bool + Send + Sync>;

/// A lookup against one store.
///
/// ```ignore
/// let query = Query::new()
///     .matching(json!({"id": 5}))
///     .order_by("timestamp")
///     .order(Order::Desc)
///     .limit(10);
/// ```
#[derive(Clone, Default)]
pub struct Query {
    /// Equality descriptor over key fields, normalized like saved keys.
    pub criteria: Option<Value>,
    /// Key field (or `timestamp`) to order by.
    pub order_by: Option<String>,
    pub order: Order,
    pub filter: Option<EntryFilter>,
    /// Presence switches the result to [`Lookup::Many`](super::Lookup::Many).
    pub limit: Option<usize>,
    /// Return entries the expiration policy considers stale.
    pub include_expired: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn matching(mut self, criteria: Value) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn filter(mut self, filter: impl Fn(&RawEntry) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn include_expired(mut self) -> Self {
        self.include_expired = true;
        self
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("criteria", &self.criteria)
            .field("order_by", &self.order_by)
            .field("order", &self.order)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .field("limit", &self.limit)
            .field("include_expired", &self.include_expired)
            .finish()
    }
}
