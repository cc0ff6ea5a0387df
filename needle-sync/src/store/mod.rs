//! Durable key-value store seam
//!
//! The coordination store is the only state shared between invocations. It
//! offers get / put-with-expiry / delete and nothing else: no transactions and
//! no compare-and-swap. Every piece of coordination built on top of it
//! (rate limiting, cooldowns, enrichment progress, run locks) is therefore
//! advisory, and last write wins.

mod memory;
mod sqlite;

pub mod keys;

pub use memory::{MemoryStore, StoreOps};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backend unreachable or failed the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Value present but not decodable as the expected type
    #[error("Store codec error for key {key}: {message}")]
    Codec { key: String, message: String },
}

/// Shared, eventually consistent, TTL-capable key-value store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value; expired entries read as `None`
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a value, replacing any previous one. `ttl = None` never expires.
    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Remove a value; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Read and decode a JSON value
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StoreError::Codec {
                key: key.to_string(),
                message: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON value
pub async fn put_json<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value).map_err(|e| StoreError::Codec {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.put(key, &raw, ttl).await
}

/// Absolute expiry in Unix milliseconds for a TTL starting at `now_ms`
pub(crate) fn expires_at(now_ms: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|d| now_ms.saturating_add(d.as_millis() as i64))
}
