//! Response cache over the shared store
//!
//! Keys are `cache:<task>:<param>...` with every parameter trimmed and
//! lower-cased, so case or whitespace differences in user input share one
//! entry. Each task has a fixed TTL; a zero TTL disables caching for that
//! task. Confirmed negatives are stored as a sentinel so a repeat lookup
//! within the TTL answers "not found" without a network call.
//!
//! The cache never stands between a caller and the upstream: store failures
//! read as a miss and failed writes are logged and dropped.

use crate::services::upstream::{Lookup, UpstreamError};
use crate::store::KvStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Stored value meaning "looked up, confirmed absent"
pub const NOT_FOUND_SENTINEL: &str = "__needle_not_found__";

const DAY: u64 = 24 * 60 * 60;

/// Cached lookup kinds, each with its own TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTask {
    ArtistSummary,
    CatalogArtist,
    MasterDetails,
    StreamingLinks,
    TopArtists,
    /// Always fresh
    RecentTracks,
}

impl CacheTask {
    pub fn name(&self) -> &'static str {
        match self {
            CacheTask::ArtistSummary => "artistSummary",
            CacheTask::CatalogArtist => "catalogArtist",
            CacheTask::MasterDetails => "masterDetails",
            CacheTask::StreamingLinks => "streamingLinks",
            CacheTask::TopArtists => "topArtists",
            CacheTask::RecentTracks => "recentTracks",
        }
    }

    pub fn default_ttl(&self) -> Duration {
        match self {
            CacheTask::ArtistSummary => Duration::from_secs(180 * DAY),
            CacheTask::CatalogArtist => Duration::from_secs(30 * DAY),
            CacheTask::MasterDetails => Duration::from_secs(90 * DAY),
            CacheTask::StreamingLinks => Duration::from_secs(7 * DAY),
            CacheTask::TopArtists => Duration::from_secs(6 * 60 * 60),
            CacheTask::RecentTracks => Duration::ZERO,
        }
    }
}

/// Result of a cache read
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    Hit(T),
    /// Negative entry: the upstream confirmed there is nothing
    NotFound,
    Miss,
}

/// Build the normalized key for a task and its parameters
///
/// Parameters are trimmed and lower-cased; `%` and `:` inside a parameter
/// are percent-encoded so distinct parameter lists never share a key.
pub fn cache_key(task: CacheTask, params: &[&str]) -> String {
    let mut key = format!("cache:{}", task.name());
    for param in params {
        key.push(':');
        for c in param.trim().to_lowercase().chars() {
            match c {
                '%' => key.push_str("%25"),
                ':' => key.push_str("%3a"),
                c => key.push(c),
            }
        }
    }
    key
}

pub struct ResponseCache {
    store: Arc<dyn KvStore>,
    ttl_overrides: HashMap<CacheTask, Duration>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            ttl_overrides: HashMap::new(),
        }
    }

    /// Replace a task's TTL policy
    pub fn with_ttl(mut self, task: CacheTask, ttl: Duration) -> Self {
        self.ttl_overrides.insert(task, ttl);
        self
    }

    pub fn ttl(&self, task: CacheTask) -> Duration {
        self.ttl_overrides
            .get(&task)
            .copied()
            .unwrap_or_else(|| task.default_ttl())
    }

    pub async fn get<T: DeserializeOwned>(&self, task: CacheTask, params: &[&str]) -> CacheLookup<T> {
        let key = cache_key(task, params);

        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheLookup::Miss,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                return CacheLookup::Miss;
            }
        };

        if raw == NOT_FOUND_SENTINEL {
            debug!(key = %key, "Cache hit (not found)");
            return CacheLookup::NotFound;
        }

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key = %key, "Cache hit");
                CacheLookup::Hit(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value undecodable, treating as miss");
                CacheLookup::Miss
            }
        }
    }

    /// Store a value; a no-op for tasks whose effective TTL is zero
    pub async fn set<T: Serialize>(
        &self,
        task: CacheTask,
        params: &[&str],
        value: &T,
        ttl_override: Option<Duration>,
    ) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(task = task.name(), error = %e, "Value not serializable, not caching");
                return;
            }
        };
        self.write(task, params, &raw, ttl_override).await;
    }

    /// Record a confirmed negative under the task's TTL
    pub async fn set_not_found(&self, task: CacheTask, params: &[&str]) {
        self.write(task, params, NOT_FOUND_SENTINEL, None).await;
    }

    pub async fn delete(&self, task: CacheTask, params: &[&str]) {
        let key = cache_key(task, params);
        if let Err(e) = self.store.delete(&key).await {
            warn!(key = %key, error = %e, "Cache delete failed");
        }
    }

    /// Serve from cache, or call `fetch` and cache what it returns
    ///
    /// Both `Found` values and confirmed negatives are cached. Errors are
    /// returned as-is and never cached.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        task: CacheTask,
        params: &[&str],
        fetch: F,
    ) -> Result<Lookup<T>, UpstreamError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Lookup<T>, UpstreamError>>,
    {
        if self.ttl(task).is_zero() {
            return fetch().await;
        }

        match self.get(task, params).await {
            CacheLookup::Hit(value) => return Ok(Lookup::Found(value)),
            CacheLookup::NotFound => return Ok(Lookup::NotFound),
            CacheLookup::Miss => {}
        }

        let result = fetch().await?;
        match &result {
            Lookup::Found(value) => self.set(task, params, value, None).await,
            Lookup::NotFound => self.set_not_found(task, params).await,
        }
        Ok(result)
    }

    async fn write(&self, task: CacheTask, params: &[&str], raw: &str, ttl_override: Option<Duration>) {
        let ttl = ttl_override.unwrap_or_else(|| self.ttl(task));
        if ttl.is_zero() {
            return;
        }

        let key = cache_key(task, params);
        if let Err(e) = self.store.put(&key, raw, Some(ttl)).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }
}
