//! Collection sync pipeline

use super::PipelineError;
use crate::clock::Clock;
use crate::models::{CollectionSnapshot, SyncCooldownRecord};
use crate::services::providers::CollectionSource;
use crate::store::{get_json, keys, put_json, KvStore};
use needle_common::human_time;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Minimum time between two full syncs for one user
    pub cooldown: Duration,
    /// Upper bound on pages fetched in one sync
    pub max_pages: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(4 * 60 * 60),
            max_pages: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { item_count: usize, synced_at_ms: i64 },
    /// Too soon after the last sync; nothing was fetched
    CooldownRejected { remaining: Duration },
}

impl SyncOutcome {
    pub fn message(&self) -> String {
        match self {
            SyncOutcome::Synced { item_count, .. } => {
                format!("Synced {} collection item(s)", item_count)
            }
            SyncOutcome::CooldownRejected { remaining } => human_time::wait_message(*remaining),
        }
    }
}

pub struct CollectionSync {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    source: Arc<dyn CollectionSource>,
    settings: SyncSettings,
}

impl CollectionSync {
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        source: Arc<dyn CollectionSource>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            clock,
            source,
            settings,
        }
    }

    /// Time left before `user_id` may sync again, `None` when allowed now
    pub async fn cooldown_remaining(&self, user_id: &str) -> Result<Option<Duration>, PipelineError> {
        let record: Option<SyncCooldownRecord> =
            get_json(self.store.as_ref(), &keys::sync_cooldown(user_id)).await?;

        let Some(record) = record else {
            return Ok(None);
        };

        let elapsed = Duration::from_millis((self.clock.now_ms() - record.last_sync_at_ms).max(0) as u64);
        let remaining = self.settings.cooldown.saturating_sub(elapsed);
        Ok((!remaining.is_zero()).then_some(remaining))
    }

    /// Fetch the full collection and replace the stored snapshot
    ///
    /// Any fetch error aborts before anything is written, so the previous
    /// snapshot and cooldown stay as they were.
    pub async fn sync(&self, user_id: &str, external_username: &str) -> Result<SyncOutcome, PipelineError> {
        if let Some(remaining) = self.cooldown_remaining(user_id).await? {
            info!(
                user_id = %user_id,
                remaining_secs = remaining.as_secs(),
                "Sync rejected: cooldown active"
            );
            return Ok(SyncOutcome::CooldownRejected { remaining });
        }

        info!(user_id = %user_id, username = %external_username, "Collection sync starting");

        let items = self.fetch_all(user_id, external_username).await?;
        let synced_at_ms = self.clock.now_ms();
        let snapshot = CollectionSnapshot::new(user_id, external_username, synced_at_ms, items);
        let item_count = snapshot.items.len();

        put_json(
            self.store.as_ref(),
            &keys::collection_snapshot(user_id),
            &snapshot,
            None,
        )
        .await?;

        let cooldown = SyncCooldownRecord {
            user_id: user_id.to_string(),
            last_sync_at_ms: synced_at_ms,
        };
        if let Err(e) = put_json(
            self.store.as_ref(),
            &keys::sync_cooldown(user_id),
            &cooldown,
            Some(self.settings.cooldown),
        )
        .await
        {
            warn!(user_id = %user_id, error = %e, "Snapshot saved but cooldown not recorded");
        }

        // Progress belongs to the replaced snapshot
        if let Err(e) = self.store.delete(&keys::enrich_progress(user_id)).await {
            warn!(user_id = %user_id, error = %e, "Failed to clear previous enrichment progress");
        }

        info!(
            user_id = %user_id,
            items = item_count,
            distinct_artists = snapshot.stats.distinct_artists,
            "Collection sync complete"
        );

        Ok(SyncOutcome::Synced {
            item_count,
            synced_at_ms,
        })
    }

    async fn fetch_all(
        &self,
        user_id: &str,
        external_username: &str,
    ) -> Result<Vec<crate::models::CollectionItem>, PipelineError> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut page = 1;

        loop {
            let result = self
                .source
                .fetch_collection_page(external_username, page)
                .await
                .map_err(|e| {
                    warn!(user_id = %user_id, page, error = %e, "Collection sync aborted");
                    e
                })?;

            let fetched = result.items.len();
            for item in result.items {
                if seen.insert(item.instance_id) {
                    items.push(item);
                }
            }
            debug!(user_id = %user_id, page, pages = result.pages, fetched, "Collection page fetched");

            if page >= result.pages || page >= self.settings.max_pages {
                break;
            }
            page += 1;
        }

        Ok(items)
    }
}
