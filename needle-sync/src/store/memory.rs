//! Process-local store with clock-driven expiry
//!
//! Used by tests and dry runs. The availability switch simulates an
//! unreachable backend.

use super::{expires_at, KvStore, StoreError};
use crate::clock::Clock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at_ms: Option<i64>,
}

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOps {
    pub gets: usize,
    pub puts: usize,
    pub deletes: usize,
}

pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Toggle simulated availability; while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn ops(&self) -> StoreOps {
        StoreOps {
            gets: self.gets.load(Ordering::SeqCst),
            puts: self.puts.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Keys of live (unexpired) entries, sorted
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, e)| !is_expired(e, now))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    fn lock_entries(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))
    }
}

fn is_expired(entry: &Entry, now_ms: i64) -> bool {
    matches!(entry.expires_at_ms, Some(at) if at <= now_ms)
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let now = self.clock.now_ms();
        let mut entries = self.lock_entries()?;
        match entries.get(key) {
            Some(entry) if is_expired(entry, now) => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let entry = Entry {
            value: value.to_string(),
            expires_at_ms: expires_at(self.clock.now_ms(), ttl),
        };
        self.lock_entries()?.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        self.lock_entries()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(10_000));
        let store = MemoryStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let (_clock, store) = store();
        store.put("a", "1", None).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.delete("a").await.unwrap();
    }

    #[tokio::test]
    async fn test_entries_expire_with_clock() {
        let (clock, store) = store();
        store
            .put("a", "1", Some(Duration::from_secs(2)))
            .await
            .unwrap();

        clock.advance(Duration::from_millis(1_999));
        assert!(store.get("a").await.unwrap().is_some());

        clock.advance(Duration::from_millis(1));
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let (_clock, store) = store();
        store.put("a", "1", None).await.unwrap();
        store.set_available(false);

        assert!(matches!(store.get("a").await, Err(StoreError::Unavailable(_))));
        assert!(store.put("b", "2", None).await.is_err());
        assert!(store.delete("a").await.is_err());

        store.set_available(true);
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
        assert_eq!(store.ops(), StoreOps { gets: 2, puts: 2, deletes: 1 });
    }
}
