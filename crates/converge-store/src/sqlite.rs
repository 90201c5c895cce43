//! SQLite implementation of the DumpStore trait.
//!
//! The primary storage backend. Uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use converge_core::{ConfigCategory, Identity, MessageHash};

use crate::dump::{combine_hashes, split_hashes, ConfigDump};
use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::DumpStore;

/// SQLite-backed dump store.
///
/// Thread-safe via an internal mutex. All operations use spawn_blocking
/// so they never block the async runtime.
pub struct SqliteDumpStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDumpStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Background(format!("spawn_blocking failed: {}", e)))?
    }
}

fn lock(conn: &Arc<Mutex<Connection>>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            Some(format!("mutex poisoned: {}", e)),
        ))
    })
}

#[async_trait]
impl DumpStore for SqliteDumpStore {
    async fn save_dump(&self, dump: &ConfigDump) -> Result<()> {
        let category = dump.category.kind_tag();
        let identity = dump.identity.as_str().to_string();
        let state = dump.serialized_state.to_vec();
        let hashes = dump.combined_hashes();
        let last_mutation_ms = dump.last_mutation_ms;

        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO config_dumps (category, identity, dump, message_hashes, last_mutation_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(category, identity) DO UPDATE SET
                     dump = excluded.dump,
                     message_hashes = excluded.message_hashes,
                     last_mutation_ms = excluded.last_mutation_ms",
                params![category, identity, state, hashes, last_mutation_ms],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_dump(
        &self,
        category: ConfigCategory,
        identity: &Identity,
    ) -> Result<Option<ConfigDump>> {
        let identity = identity.clone();

        self.run_blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT dump, message_hashes, last_mutation_ms
                     FROM config_dumps WHERE category = ?1 AND identity = ?2",
                    params![category.kind_tag(), identity.as_str()],
                    |row| {
                        let state: Vec<u8> = row.get(0)?;
                        let hashes: String = row.get(1)?;
                        let last_mutation_ms: i64 = row.get(2)?;
                        Ok((state, hashes, last_mutation_ms))
                    },
                )
                .optional()?;

            Ok(row.map(|(state, hashes, last_mutation_ms)| ConfigDump {
                category,
                identity,
                serialized_state: Bytes::from(state),
                message_hashes: split_hashes(&hashes),
                last_mutation_ms,
            }))
        })
        .await
    }

    async fn message_hashes(
        &self,
        category: ConfigCategory,
        identity: &Identity,
    ) -> Result<BTreeSet<MessageHash>> {
        let identity = identity.as_str().to_string();

        self.run_blocking(move |conn| {
            let combined: Option<String> = conn
                .query_row(
                    "SELECT message_hashes FROM config_dumps
                     WHERE category = ?1 AND identity = ?2",
                    params![category.kind_tag(), identity],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(combined.map(|c| split_hashes(&c)).unwrap_or_default())
        })
        .await
    }

    async fn replace_message_hashes(
        &self,
        category: ConfigCategory,
        identity: &Identity,
        hashes: &BTreeSet<MessageHash>,
        last_mutation_ms: i64,
    ) -> Result<()> {
        let identity = identity.as_str().to_string();
        let combined = combine_hashes(hashes);

        self.run_blocking(move |conn| {
            conn.execute(
                "INSERT INTO config_dumps (category, identity, dump, message_hashes, last_mutation_ms)
                 VALUES (?1, ?2, x'', ?3, ?4)
                 ON CONFLICT(category, identity) DO UPDATE SET
                     message_hashes = excluded.message_hashes,
                     last_mutation_ms = excluded.last_mutation_ms",
                params![category.kind_tag(), identity, combined, last_mutation_ms],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_dumped(&self) -> Result<Vec<(ConfigCategory, Identity)>> {
        self.run_blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT category, identity FROM config_dumps ORDER BY category, identity",
            )?;

            let rows = stmt.query_map([], |row| {
                let tag: u16 = row.get(0)?;
                let identity: String = row.get(1)?;
                Ok((tag, identity))
            })?;

            let mut pairs = Vec::new();
            for row in rows {
                let (tag, identity) = row?;
                let category = ConfigCategory::from_kind_tag(tag)
                    .map_err(|e| StoreError::InvalidData(e.to_string()))?;
                pairs.push((category, Identity::new(identity)));
            }
            Ok(pairs)
        })
        .await
    }

    async fn delete_dump(&self, category: ConfigCategory, identity: &Identity) -> Result<bool> {
        let identity = identity.as_str().to_string();

        self.run_blocking(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM config_dumps WHERE category = ?1 AND identity = ?2",
                params![category.kind_tag(), identity],
            )?;
            Ok(deleted > 0)
        })
        .await
    }
}
