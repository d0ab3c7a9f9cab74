//! The authoritative tree and its SQLite persistence.
//!
//! The whole tree is held in memory and every top-level node is stored as
//! one JSON row, so a write touches exactly one row plus the revision
//! counter, inside one transaction.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use tokio::sync::{broadcast, RwLock};

use crate::db;
use crate::errors::AppError;
use crate::remote::tree::{get_at, normalize, segments, set_at, validate_write_path};

/// Buffered changes per subscriber before it is told it lagged.
const CHANGE_CAPACITY: usize = 256;

/// Open (creating if needed) the store database and run its migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let pool = db::open_pool(db_path).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// An in-memory store database.
pub async fn init_memory_database() -> Result<SqlitePool, sqlx::Error> {
    let pool = db::open_memory_pool().await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL DEFAULT 1,
            revision_id INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        INSERT OR IGNORE INTO meta (id, schema_version, revision_id, generated_at)
        VALUES (1, 1, 0, datetime('now'));
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            root TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Revision counter of the tree, bumped by every write.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionInfo {
    pub revision_id: i64,
    pub generated_at: String,
}

/// A committed write.
#[derive(Debug, Clone)]
pub struct TreeChange {
    pub path: String,
    pub revision_id: i64,
}

struct TreeState {
    tree: Value,
    revision: RevisionInfo,
}

pub struct TreeRepository {
    pool: SqlitePool,
    state: RwLock<TreeState>,
    changes: broadcast::Sender<TreeChange>,
}

impl TreeRepository {
    /// Load the stored tree. Rows that no longer parse are skipped.
    pub async fn load(pool: SqlitePool) -> Result<Self, AppError> {
        let rows = sqlx::query("SELECT root, value FROM nodes ORDER BY root")
            .fetch_all(&pool)
            .await?;

        let mut tree = Map::new();
        for row in rows {
            let root: String = row.get("root");
            let text: String = row.get("value");
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => {
                    tree.insert(root, value);
                }
                Err(e) => tracing::warn!("Skipping unreadable node '{}': {}", root, e),
            }
        }

        let meta = sqlx::query("SELECT revision_id, generated_at FROM meta WHERE id = 1")
            .fetch_one(&pool)
            .await?;
        let revision = RevisionInfo {
            revision_id: meta.get("revision_id"),
            generated_at: meta.get("generated_at"),
        };

        tracing::info!(
            "Loaded {} top-level nodes at revision {}",
            tree.len(),
            revision.revision_id
        );

        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Ok(Self {
            pool,
            state: RwLock::new(TreeState {
                tree: Value::Object(tree),
                revision,
            }),
            changes,
        })
    }

    /// Value at `path`, or `None` when absent. The empty path is the root.
    pub async fn get(&self, path: &str) -> Option<Value> {
        get_at(&self.state.read().await.tree, path)
    }

    pub async fn revision_id(&self) -> i64 {
        self.state.read().await.revision.revision_id
    }

    pub async fn revision_info(&self) -> RevisionInfo {
        self.state.read().await.revision.clone()
    }

    /// Receiver of every committed write.
    pub fn changes(&self) -> broadcast::Receiver<TreeChange> {
        self.changes.subscribe()
    }

    /// Replace the subtree at `path`; `null` deletes it. Returns the new
    /// revision. Nothing changes in memory unless the write committed.
    pub async fn set(&self, path: &str, value: Value) -> Result<i64, AppError> {
        validate_write_path(path).map_err(AppError::Validation)?;
        let path = normalize(path);
        let root = segments(&path)
            .first()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Validation("Empty path".to_string()))?;

        let mut state = self.state.write().await;
        let mut tree = state.tree.clone();
        set_at(&mut tree, &path, value);

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        match get_at(&tree, &root) {
            Some(node) => {
                sqlx::query(
                    r#"
                    INSERT INTO nodes (root, value, updated_at) VALUES (?, ?, ?)
                    ON CONFLICT(root) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                    "#,
                )
                .bind(&root)
                .bind(serde_json::to_string(&node)?)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM nodes WHERE root = ?")
                    .bind(&root)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query("UPDATE meta SET revision_id = revision_id + 1, generated_at = ? WHERE id = 1")
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        let revision_id: i64 = sqlx::query("SELECT revision_id FROM meta WHERE id = 1")
            .fetch_one(&mut *tx)
            .await?
            .get("revision_id");

        tx.commit().await?;

        state.tree = tree;
        state.revision = RevisionInfo {
            revision_id,
            generated_at: now,
        };
        drop(state);

        tracing::debug!("Wrote '{}' at revision {}", path, revision_id);
        // No receivers is fine.
        let _ = self.changes.send(TreeChange { path, revision_id });

        Ok(revision_id)
    }
}
