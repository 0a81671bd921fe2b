//! SQLite-based durable backend
//!
//! One row per key. Statements run on the blocking pool so async callers never
//! stall a scheduler thread.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::KvBackend;
use crate::error::StoreError;

/// Schema version - increment to trigger nuke-and-rebuild
const SCHEMA_VERSION: i32 = 1;

/// Database file name inside the data directory
const DB_FILE: &str = "store.db";

type Result<T> = std::result::Result<T, StoreError>;

/// SQLite-backed [`KvBackend`]
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteBackend {
    /// Open or create the store at the default data location
    pub fn open() -> Result<Self> {
        let dir = Self::default_dir()?;
        Self::open_at(&dir)
    }

    /// Default data directory (~/.cache/safestash on Linux)
    pub fn default_dir() -> Result<PathBuf> {
        let cache_base = dirs::cache_dir().ok_or_else(|| {
            StoreError::StorageUnavailable("Could not determine cache directory".to_string())
        })?;
        Ok(cache_base.join("safestash"))
    }

    /// Open the store inside a specific directory
    pub fn open_at(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            StoreError::StorageUnavailable(format!("Failed to create data dir: {}", e))
        })?;

        let db_path = dir.join(DB_FILE);
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;

        // Check schema version - nuke if mismatched
        let version: i32 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap_or(0);

        if version != 0 && version != SCHEMA_VERSION {
            log::info!(
                "Store schema version mismatch ({} != {}), rebuilding",
                version,
                SCHEMA_VERSION
            );
            drop(conn);
            std::fs::remove_file(&db_path).map_err(|e| {
                StoreError::StorageUnavailable(format!("Failed to remove store DB: {}", e))
            })?;
            return Self::open_at(dir);
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_items (
                item_key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL,
                updated_at INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL
            );
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: db_path,
        })
    }

    /// Path of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Item count and total payload size across all namespaces
    pub async fn stats(&self) -> Result<BackendStats> {
        self.run(|conn| {
            let (total_items, total_size): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM kv_items",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            Ok(BackendStats {
                total_items: total_items as usize,
                total_size_bytes: total_size as usize,
            })
        })
        .await
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::StorageUnavailable("Store lock poisoned".to_string()))?;
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl KvBackend for SqliteBackend {
    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let key = key.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM kv_items WHERE item_key = ?1",
                    [&key],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn set_item(&self, key: &str, value: &[u8]) -> Result<()> {
        let key = key.to_string();
        let value = value.to_vec();
        self.run(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO kv_items (item_key, value, updated_at, size_bytes)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key, value, Utc::now().timestamp(), value.len()],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.run(move |conn| {
            conn.execute("DELETE FROM kv_items WHERE item_key = ?1", [&key])?;
            Ok(())
        })
        .await
    }

    async fn get_all_keys(&self) -> Result<BTreeSet<String>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT item_key FROM kv_items")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<BTreeSet<_>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn remove_items(&self, keys: &[String]) -> Result<()> {
        let keys = keys.to_vec();
        self.run(move |conn| {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare("DELETE FROM kv_items WHERE item_key = ?1")?;
                for key in &keys {
                    stmt.execute([key])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT item_key FROM kv_items WHERE substr(item_key, 1, length(?1)) = ?1",
            )?;
            let keys = stmt
                .query_map([&prefix], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(keys)
        })
        .await
    }
}

/// Statistics about the whole store
#[derive(Debug, Clone, Copy)]
pub struct BackendStats {
    pub total_items: usize,
    pub total_size_bytes: usize,
}
