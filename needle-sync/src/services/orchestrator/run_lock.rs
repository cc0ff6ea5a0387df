//! Advisory per-user enrichment run lock
//!
//! Without compare-and-swap the lock is write-then-verify: write our token,
//! read it back, and only proceed if our token survived. Two writers racing
//! inside the same instant can still both win; the lock narrows overlapping
//! batches, it does not exclude them. A crashed holder is released by the
//! TTL.

use crate::clock::Clock;
use crate::models::RunLockRecord;
use crate::store::{get_json, keys, put_json, KvStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

pub struct RunLock {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl RunLock {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Try to take the lock; `Ok(None)` when another live holder has it
    pub async fn acquire(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let key = keys::enrich_lock(user_id);
        let now = self.clock.now_ms();

        if let Some(existing) = get_json::<RunLockRecord>(self.store.as_ref(), &key).await? {
            if existing.expires_at_ms > now {
                debug!(user_id = %user_id, "Enrichment lock held by another run");
                return Ok(None);
            }
        }

        let record = RunLockRecord {
            token: Uuid::new_v4().to_string(),
            acquired_at_ms: now,
            expires_at_ms: now.saturating_add(self.ttl.as_millis() as i64),
        };
        put_json(self.store.as_ref(), &key, &record, Some(self.ttl)).await?;

        match get_json::<RunLockRecord>(self.store.as_ref(), &key).await? {
            Some(current) if current.token == record.token => Ok(Some(record.token)),
            _ => {
                debug!(user_id = %user_id, "Enrichment lock lost to a concurrent run");
                Ok(None)
            }
        }
    }

    /// Push the expiry out by a full TTL if the lock is still ours
    ///
    /// `Ok(false)` means another run has taken the lock over.
    pub async fn renew(&self, user_id: &str, token: &str) -> Result<bool, StoreError> {
        let key = keys::enrich_lock(user_id);
        match get_json::<RunLockRecord>(self.store.as_ref(), &key).await? {
            Some(mut current) if current.token == token => {
                current.expires_at_ms = self
                    .clock
                    .now_ms()
                    .saturating_add(self.ttl.as_millis() as i64);
                put_json(self.store.as_ref(), &key, &current, Some(self.ttl)).await?;
                debug!(user_id = %user_id, "Enrichment lock renewed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Release if still ours; failures only delay the next run until the TTL
    pub async fn release(&self, user_id: &str, token: &str) {
        let key = keys::enrich_lock(user_id);
        match get_json::<RunLockRecord>(self.store.as_ref(), &key).await {
            Ok(Some(current)) if current.token == token => {
                if let Err(e) = self.store.delete(&key).await {
                    warn!(user_id = %user_id, error = %e, "Failed to release enrichment lock");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(user_id = %user_id, error = %e, "Failed to read enrichment lock for release"),
        }
    }
}
