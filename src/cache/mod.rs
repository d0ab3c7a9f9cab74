//! Local cache store.
//!
//! A key/value table in a SQLite file on the client device, one JSON blob
//! per logical key. The cache has no authority of its own: it mirrors what
//! the remote store returned and serves reads while the remote is
//! unreachable. Its contract is that it never fails. Codec and database
//! errors are logged and turned into no-ops or defaults.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::db;
use crate::errors::SyncError;

/// Logical keys of the board schema.
pub mod keys {
    pub const RESOURCES_BY_DAY: &str = "resourcesByDay";
    pub const PERSONS_BY_DAY: &str = "personsByDay";
    pub const ROSTER_DATES_BY_DAY: &str = "rosterDatesByDay";
    pub const SETTINGS: &str = "settings";

    // Flat keys written before the board was partitioned by day.
    pub const LEGACY_RESOURCES: &str = "resources";
    pub const LEGACY_PERSONS: &str = "personList";
    pub const LEGACY_ROSTER_DATE: &str = "rosterDate";

    /// Suffix under which migrated legacy blobs are kept.
    pub const LEGACY_SUFFIX: &str = "_legacy";
}

/// Open (creating if needed) the cache file and run the cache migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let pool = db::open_pool(db_path).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// An in-memory cache database.
pub async fn init_memory_database() -> Result<SqlitePool, sqlx::Error> {
    let pool = db::open_memory_pool().await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Key/value cache over a SQLite pool.
#[derive(Clone)]
pub struct LocalCache {
    pool: SqlitePool,
}

impl LocalCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open the cache file at `path`.
    pub async fn open(path: &Path) -> Result<Self, SyncError> {
        let pool = init_database(path)
            .await
            .map_err(|e| SyncError::Config(format!("Cannot open local cache: {}", e)))?;
        tracing::debug!("Local cache opened at {:?}", path);
        Ok(Self::new(pool))
    }

    /// A throwaway cache that lives only as long as this value.
    pub async fn in_memory() -> Result<Self, SyncError> {
        let pool = init_memory_database()
            .await
            .map_err(|e| SyncError::Config(format!("Cannot open local cache: {}", e)))?;
        Ok(Self::new(pool))
    }

    /// Persist `value` under `key`. Failures are logged and ignored.
    pub async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(e) = self.try_save(key, value).await {
            tracing::warn!("Local cache save of '{}' skipped: {}", key, e);
        }
    }

    /// Persist `value` under `key`, reporting failures.
    pub async fn try_save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), SyncError> {
        let json = serde_json::to_string(value)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO cache_entries (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(&json)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| SyncError::CacheCodec(format!("Cache write failed: {}", e)))?;

        Ok(())
    }

    /// Load the value stored under `key`, or `default` when it is missing or
    /// cannot be decoded.
    pub async fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.load_text(key).await else {
            return default;
        };

        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Local cache entry '{}' is malformed, using default: {}", key, e);
                default
            }
        }
    }

    /// Load the stored JSON without decoding it into a type.
    pub async fn load_raw(&self, key: &str) -> Option<Value> {
        let raw = self.load_text(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Local cache entry '{}' is not JSON: {}", key, e);
                None
            }
        }
    }

    async fn load_text(&self, key: &str) -> Option<String> {
        let row = sqlx::query("SELECT value FROM cache_entries WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(row) => row.map(|r| r.get("value")),
            Err(e) => {
                tracing::warn!("Local cache read of '{}' failed: {}", key, e);
                None
            }
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.load_text(key).await.is_some()
    }

    pub async fn remove(&self, key: &str) {
        if let Err(e) = self.try_remove(key).await {
            tracing::warn!("Local cache remove of '{}' skipped: {}", key, e);
        }
    }

    pub async fn try_remove(&self, key: &str) -> Result<(), SyncError> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| SyncError::CacheCodec(format!("Cache delete failed: {}", e)))?;
        Ok(())
    }

    /// All keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        match sqlx::query("SELECT key FROM cache_entries ORDER BY key")
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows.into_iter().map(|row| row.get("key")).collect(),
            Err(e) => {
                tracing::warn!("Local cache key listing failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Every entry as raw text, keyed and sorted by key.
    pub async fn entries(&self) -> BTreeMap<String, String> {
        match sqlx::query("SELECT key, value FROM cache_entries")
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows
                .into_iter()
                .map(|row| (row.get("key"), row.get("value")))
                .collect(),
            Err(e) => {
                tracing::warn!("Local cache listing failed: {}", e);
                BTreeMap::new()
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Write raw text under `key`, bypassing serialization.
    #[cfg(test)]
    pub(crate) async fn save_text(&self, key: &str, text: &str) {
        sqlx::query(
            "INSERT OR REPLACE INTO cache_entries (key, value, updated_at) VALUES (?, ?, 'test')",
        )
        .bind(key)
        .bind(text)
        .execute(&self.pool)
        .await
        .unwrap();
    }
}
