//! Database connection management with pragma configuration.
//!
//! This module handles locating the per-namespace SQLite container, opening
//! it with the required pragmas (WAL mode), reconciling its schema, and
//! destroying it during recovery.

use std::path::{Path, PathBuf};

use super::migrations;
use super::schema::Schema;
use crate::Error;
use tokio_rusqlite::Connection;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;";

/// Where a cache container lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A SQLite file on disk.
    File(PathBuf),
    /// A private in-memory database, discarded when closed.
    Memory,
}

impl Location {
    /// File location for a namespace under `data_dir`.
    pub fn for_namespace(data_dir: impl AsRef<Path>, namespace: &str) -> Self {
        Location::File(data_dir.as_ref().join(format!("{namespace}.sqlite")))
    }

    /// Remove the container and its WAL side files.
    ///
    /// Missing files are not an error.
    pub async fn destroy(&self) -> Result<(), Error> {
        let Location::File(path) = self else {
            return Ok(());
        };

        for suffix in ["", "-wal", "-shm", "-journal"] {
            let mut target = path.clone().into_os_string();
            target.push(suffix);
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Cache database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct CacheDb {
    pub(crate) conn: Connection,
}

impl CacheDb {
    /// Open the container at `location` and reconcile it with `schema`.
    ///
    /// Creates the file (and its directory) if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error classified as corruption if the file is not a
    /// SQLite database or its stored schema is incompatible.
    pub async fn open(location: &Location, schema: &Schema, version: u32) -> Result<Self, Error> {
        let conn = match location {
            Location::File(path) => {
                if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(dir).await?;
                }
                Connection::open(path).await
            }
            Location::Memory => Connection::open_in_memory().await,
        }
        .map_err(|e| Error::Database(e.into()))?;

        let prepared = match conn
            .call(|conn| {
                conn.execute_batch(PRAGMAS)?;
                Ok(())
            })
            .await
        {
            Ok(()) => migrations::run(&conn, schema, version).await,
            Err(e) => Err(Error::Database(e)),
        };

        // A rejected container may be destroyed next; close it first so its
        // WAL checkpoint cannot touch the replacement's files.
        if let Err(e) = prepared {
            if let Err(close_err) = conn.close().await {
                tracing::debug!(error = %close_err, "Closing rejected cache container failed");
            }
            return Err(e);
        }

        Ok(Self { conn })
    }

    /// Close the underlying connection.
    pub async fn close(self) -> Result<(), Error> {
        self.conn.close().await.map_err(Error::Database)
    }
}
