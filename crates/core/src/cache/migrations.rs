//! Schema reconciliation.
//!
//! The container records its schema version in `_meta` and the shape each
//! store table was created with in `_stores`. Opening compares both with
//! the configured schema:
//!
//! - fresh container: create every table and stamp the version
//! - same version, same layout: nothing to do
//! - older version: drop tables whose shape changed or whose store is gone,
//!   create missing ones, keep the rest, stamp the new version
//! - same version with a different layout, or a newer version: corruption

use std::collections::BTreeMap;

use super::Error;
use super::schema::Schema;
use super::tables::{create_table_sql, quote_ident};
use tokio_rusqlite::rusqlite::{self, OptionalExtension};
use tokio_rusqlite::{Connection, params};

const BOOKKEEPING: &str = "CREATE TABLE IF NOT EXISTS _meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS _stores (
        name TEXT PRIMARY KEY,
        shape TEXT NOT NULL
    );";

const VERSION_KEY: &str = "schema_version";

/// Bring the container in line with `schema` at `version`.
///
/// # Errors
///
/// Returns `Error::SchemaCorruption` if the stored state cannot be
/// reconciled without discarding the whole container.
pub async fn run(conn: &Connection, schema: &Schema, version: u32) -> Result<(), Error> {
    let schema = schema.clone();
    conn.call(move |conn| reconcile(conn, &schema, version))
        .await
        .map_err(Error::from)
}

fn reconcile(conn: &mut rusqlite::Connection, schema: &Schema, version: u32) -> Result<(), Error> {
    let tx = conn.transaction()?;
    tx.execute_batch(BOOKKEEPING)?;

    let stored = stored_version(&tx)?;
    let existing = stored_layout(&tx)?;
    let desired: BTreeMap<String, String> = schema
        .iter()
        .map(|(name, shape)| (name.to_string(), shape.to_string()))
        .collect();

    match stored {
        Some(v) if v > version => {
            return Err(Error::SchemaCorruption(format!(
                "stored schema version {v} is newer than configured version {version}"
            )));
        }
        Some(v) if v == version => {
            if existing != desired {
                return Err(Error::SchemaCorruption(format!(
                    "store layout changed without bumping schema version {version}"
                )));
            }
            for name in desired.keys() {
                if !table_exists(&tx, name)? {
                    return Err(Error::SchemaCorruption(format!("table for store {name:?} is missing")));
                }
            }
            return Ok(());
        }
        _ => {}
    }

    for (name, shape) in &existing {
        if desired.get(name) != Some(shape) {
            tracing::debug!(store = %name, "Dropping store table with outdated shape");
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)))?;
            tx.execute("DELETE FROM _stores WHERE name = ?1", params![name])?;
        }
    }

    for (name, shape) in schema.iter() {
        tx.execute_batch(&create_table_sql(name, shape))?;
        tx.execute(
            "INSERT INTO _stores (name, shape) VALUES (?1, ?2)
            ON CONFLICT(name) DO UPDATE SET shape = excluded.shape",
            params![name, shape.to_string()],
        )?;
    }

    for (key, value) in [(VERSION_KEY, version.to_string()), ("updated_at", chrono::Utc::now().to_rfc3339())] {
        tx.execute(
            "INSERT INTO _meta (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
    }

    tx.commit()?;
    tracing::debug!(from = ?stored, to = version, stores = schema.len(), "Cache schema reconciled");
    Ok(())
}

fn stored_version(conn: &rusqlite::Connection) -> Result<Option<u32>, Error> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM _meta WHERE key = ?1", params![VERSION_KEY], |row| row.get(0))
        .optional()?;

    raw.map(|v| {
        v.parse()
            .map_err(|_| Error::SchemaCorruption(format!("unreadable schema version {v:?}")))
    })
    .transpose()
}

fn stored_layout(conn: &rusqlite::Connection) -> Result<BTreeMap<String, String>, Error> {
    let mut stmt = conn.prepare("SELECT name, shape FROM _stores")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect::<Result<_, _>>().map_err(Error::from)
}

fn table_exists(conn: &rusqlite::Connection, name: &str) -> Result<bool, Error> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        params![name],
        |row| row.get(0),
    )?;
    Ok(exists)
}
