//! Per-store table operations.
//!
//! Every logical store is one SQLite table with the columns
//! `(pk, key_json, data, timestamp)`. Key fields are stored as canonical
//! JSON and addressed through `json_extract`, so equality lookups and
//! ordering on any key field happen inside SQLite.

use serde_json::{Map, Value};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::{self, params_from_iter, types::Value as SqlValue};

use super::connection::CacheDb;
use super::entry::RawEntry;
use super::fingerprint::canonical_json;
use super::query::Order;
use super::schema::IndexShape;
use crate::Error;

/// Pseudo-field that orders by write time instead of a key field.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Quote an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL expression reading one key field; `field` must satisfy
/// `schema::is_field_name`.
pub(crate) fn field_expr(field: &str) -> String {
    format!("json_extract(key_json, '$.\"{field}\"')")
}

/// SQL expression reading one key field as its JSON text.
fn field_text_expr(field: &str) -> String {
    format!("(key_json -> '$.\"{field}\"')")
}

/// Index names live in the same namespace as tables; store names never
/// start with `_`.
fn index_name(store: &str, suffix: &str) -> String {
    quote_ident(&format!("_idx:{store}:{suffix}"))
}

/// DDL creating a store table and its indexes.
pub(crate) fn create_table_sql(store: &str, shape: &IndexShape) -> String {
    let table = quote_ident(store);
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            pk TEXT PRIMARY KEY,
            key_json TEXT NOT NULL,
            data TEXT NOT NULL,
            timestamp INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS {} ON {table}(timestamp);",
        index_name(store, "timestamp"),
    );

    // json_each lookups on multi-value fields cannot use an expression index.
    for spec in shape.specs().iter().filter(|s| !s.multi) {
        let exprs: Vec<String> = spec.fields.iter().map(|f| field_expr(f)).collect();
        sql.push_str(&format!(
            "\nCREATE INDEX IF NOT EXISTS {} ON {table}({});",
            index_name(store, &spec.fields.join("+")),
            exprs.join(", "),
        ));
    }
    sql
}

/// One equality condition on a normalized key field.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub value: Value,
    pub multi: bool,
}

impl Condition {
    /// Non-`i64` numbers (large unsigned, floats) can lose precision as SQL
    /// values, so they are compared by their JSON text instead.
    fn by_text(&self) -> bool {
        matches!(&self.value, Value::Number(n) if n.as_i64().is_none())
    }

    fn sql(&self) -> String {
        match (&self.value, self.multi) {
            (Value::Array(_), _) | (_, false) if self.by_text() => format!("{} = ?", field_text_expr(&self.field)),
            (Value::Array(_), _) | (_, false) => format!("{} = ?", field_expr(&self.field)),
            (_, true) if self.by_text() => format!(
                "EXISTS (SELECT 1 FROM json_each(key_json, '$.\"{}\"') WHERE (key_json -> json_each.fullkey) = ?)",
                self.field
            ),
            (_, true) => format!(
                "EXISTS (SELECT 1 FROM json_each(key_json, '$.\"{}\"') WHERE json_each.value = ?)",
                self.field
            ),
        }
    }

    fn bind(&self) -> SqlValue {
        match &self.value {
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Text(n.to_string()),
            },
            Value::Null => SqlValue::Null,
            composite => SqlValue::Text(canonical_json(composite)),
        }
    }
}

/// Ordering applied before filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    pub field: String,
    pub order: Order,
}

impl Ordering {
    fn sql(&self) -> String {
        let direction = match self.order {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        };
        let expr = if self.field == TIMESTAMP_FIELD { TIMESTAMP_FIELD.to_string() } else { field_expr(&self.field) };
        format!(" ORDER BY {expr} {direction}, timestamp {direction}")
    }
}

fn where_clause(conditions: &[Condition]) -> String {
    if conditions.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = conditions.iter().map(Condition::sql).collect();
    format!(" WHERE {}", parts.join(" AND "))
}

/// Per-store counters reported by [`CacheDb::table_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableStats {
    pub entries: u64,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
}

impl CacheDb {
    /// Insert or replace the row identified by `pk`.
    pub async fn upsert_entry(
        &self, store: &str, pk: String, key_json: String, data_json: String, timestamp: i64,
    ) -> Result<(), Error> {
        let sql = format!(
            "INSERT INTO {} (pk, key_json, data, timestamp) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(pk) DO UPDATE SET
                key_json = excluded.key_json,
                data = excluded.data,
                timestamp = excluded.timestamp",
            quote_ident(store)
        );
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(&sql, params![pk, key_json, data_json, timestamp])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Stream matching rows in order, keeping those accepted by `keep`,
    /// and stop once `limit` rows have been collected.
    pub async fn select_entries<F>(
        &self, store: &str, conditions: Vec<Condition>, ordering: Option<Ordering>, limit: usize, mut keep: F,
    ) -> Result<Vec<RawEntry>, Error>
    where
        F: FnMut(&RawEntry) -> bool + Send + 'static,
    {
        let mut sql = format!("SELECT key_json, data, timestamp FROM {}", quote_ident(store));
        sql.push_str(&where_clause(&conditions));
        if let Some(ordering) = &ordering {
            sql.push_str(&ordering.sql());
        }
        let binds: Vec<SqlValue> = conditions.iter().map(Condition::bind).collect();
        let store = store.to_string();

        self.conn
            .call(move |conn| -> Result<Vec<RawEntry>, Error> {
                let mut found = Vec::new();
                if limit == 0 {
                    return Ok(found);
                }

                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params_from_iter(binds.iter()))?;
                while let Some(row) = rows.next()? {
                    let entry = match decode_row(row) {
                        Ok(entry) => entry,
                        Err(e) => {
                            tracing::warn!(store = %store, error = %e, "Skipping undecodable cache row");
                            continue;
                        }
                    };
                    if keep(&entry) {
                        found.push(entry);
                        if found.len() >= limit {
                            break;
                        }
                    }
                }
                Ok(found)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete rows written before `cutoff`.
    ///
    /// Returns the number of deleted entries.
    pub async fn delete_older_than(&self, store: &str, cutoff: i64) -> Result<u64, Error> {
        let sql = format!("DELETE FROM {} WHERE timestamp < ?1", quote_ident(store));
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(&sql, params![cutoff])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete rows matching every condition.
    ///
    /// Returns the number of deleted entries.
    pub async fn delete_matching(&self, store: &str, conditions: Vec<Condition>) -> Result<u64, Error> {
        let sql = format!("DELETE FROM {}{}", quote_ident(store), where_clause(&conditions));
        let binds: Vec<SqlValue> = conditions.iter().map(Condition::bind).collect();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(&sql, params_from_iter(binds.iter()))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Entry count and timestamp range of one store.
    pub async fn table_stats(&self, store: &str) -> Result<TableStats, Error> {
        let sql = format!("SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM {}", quote_ident(store));
        self.conn
            .call(move |conn| -> Result<TableStats, Error> {
                let stats = conn.query_row(&sql, [], |row| {
                    Ok(TableStats { entries: row.get::<_, i64>(0)? as u64, oldest: row.get(1)?, newest: row.get(2)? })
                })?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }
}

fn decode_row(row: &rusqlite::Row<'_>) -> Result<RawEntry, Error> {
    let key_json: String = row.get(0)?;
    let data_json: String = row.get(1)?;
    let key: Map<String, Value> = serde_json::from_str(&key_json)?;
    let data: Value = serde_json::from_str(&data_json)?;
    Ok(RawEntry { key, data, timestamp: row.get(2)? })
}
