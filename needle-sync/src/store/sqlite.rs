//! SQLite-backed store
//!
//! One row per key in `kv_entries`. Expired rows are invisible to `get` and
//! removed lazily on read or by [`SqliteStore::purge_expired`]. Writes are
//! plain upserts: last write wins, there is no conditional update.

use super::{expires_at, KvStore, StoreError};
use crate::clock::Clock;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Wrap a pool and create the `kv_entries` table if missing
    pub async fn open(pool: SqlitePool, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at_ms INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(unavailable)?;

        debug!("Key-value table initialized (kv_entries)");
        Ok(Self { pool, clock })
    }

    /// Delete every expired row, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM kv_entries WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?",
        )
        .bind(self.clock.now_ms())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(result.rows_affected())
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(String, Option<i64>)> =
            sqlx::query_as("SELECT value, expires_at_ms FROM kv_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;

        match row {
            Some((_, Some(expires_at_ms))) if expires_at_ms <= self.clock.now_ms() => {
                // Lazy purge; a failure here only leaves a dead row behind
                let _ = sqlx::query("DELETE FROM kv_entries WHERE key = ? AND expires_at_ms = ?")
                    .bind(key)
                    .bind(expires_at_ms)
                    .execute(&self.pool)
                    .await;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, expires_at_ms) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at_ms = excluded.expires_at_ms
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at(self.clock.now_ms(), ttl))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}
