//! Resumable enrichment batches
//!
//! One batch: lock, load snapshot and progress, look up the next
//! `batch_size` enrichable items after the cursor, apply the results, persist
//! the snapshot and then the progress, unlock. A batch that fails part way
//! persists nothing, so the next invocation repeats it from the same cursor;
//! cached lookups make that repeat cheap.

use super::{PipelineError, RunLock};
use crate::clock::Clock;
use crate::models::{
    CollectionSnapshot, EnrichmentNeed, EnrichmentProgress, EnrichmentStatus, MasterEnrichment,
    ProgressStatus,
};
use crate::queue::{QueueMessage, TaskQueue};
use crate::services::providers::CollectionSource;
use crate::services::response_cache::{CacheTask, ResponseCache};
use crate::services::upstream::{Lookup, UpstreamError};
use crate::store::{get_json, keys, put_json, KvStore};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause between attempts when a drain finds the run lock held
const BUSY_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentSettings {
    pub batch_size: usize,
    /// Concurrent lookups within one batch
    pub concurrency: usize,
    /// Upper bound on batches in one [`EnrichmentRunner::drain`]
    pub max_batches_per_drain: usize,
    pub lock_ttl: Duration,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            batch_size: 25,
            concurrency: 4,
            max_batches_per_drain: 200,
            lock_ttl: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrichOutcome {
    /// Nothing left to do for the current snapshot
    Complete(EnrichmentProgress),
    /// One batch ran; progress may or may not be complete
    Batch(EnrichmentProgress),
    /// Handed off to the background queue
    Queued,
    /// Another run holds the user's lock
    Busy,
    /// The snapshot was replaced mid-batch; results were discarded
    Superseded,
}

/// Read-only view of a user's enrichment state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub synced_at_ms: i64,
    pub item_count: usize,
    pub need: EnrichmentNeed,
    /// `None` when no run has started for the current snapshot
    pub progress: Option<EnrichmentProgress>,
}

pub struct EnrichmentRunner {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    source: Arc<dyn CollectionSource>,
    cache: Arc<ResponseCache>,
    queue: Option<Arc<dyn TaskQueue>>,
    lock: RunLock,
    settings: EnrichmentSettings,
}

impl EnrichmentRunner {
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        source: Arc<dyn CollectionSource>,
        cache: Arc<ResponseCache>,
        settings: EnrichmentSettings,
    ) -> Self {
        let lock = RunLock::new(store.clone(), clock.clone(), settings.lock_ttl);
        Self {
            store,
            clock,
            source,
            cache,
            queue: None,
            lock,
            settings,
        }
    }

    /// Hand off work to a background queue instead of running inline
    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Entry point for an enrichment request
    ///
    /// Returns `Complete` without any network call when nothing is left.
    /// With a queue configured, submits one message and returns `Queued`;
    /// otherwise runs a single batch inline.
    pub async fn enrich(&self, user_id: &str, external_username: &str) -> Result<EnrichOutcome, PipelineError> {
        let report = self.report(user_id).await?;

        if let Some(progress) = report.progress.filter(|p| p.is_complete()) {
            debug!(user_id = %user_id, "Enrichment already complete for this snapshot");
            return Ok(EnrichOutcome::Complete(progress));
        }
        if report.need.needs_enrichment == 0 {
            let now = self.clock.now_ms();
            return Ok(EnrichOutcome::Complete(EnrichmentProgress::start(
                user_id,
                report.synced_at_ms,
                &report.need,
                now,
            )));
        }

        if let Some(queue) = &self.queue {
            queue
                .send(QueueMessage::EnrichCollection {
                    user_id: user_id.to_string(),
                    external_username: external_username.to_string(),
                })
                .await?;
            info!(
                user_id = %user_id,
                needs_enrichment = report.need.needs_enrichment,
                "Enrichment handed off to background queue"
            );
            return Ok(EnrichOutcome::Queued);
        }

        self.run_batch(user_id).await
    }

    /// Current snapshot need plus the progress of its run, if any
    pub async fn report(&self, user_id: &str) -> Result<EnrichmentReport, PipelineError> {
        let snapshot = self.load_snapshot(user_id).await?;
        let progress = self
            .load_progress(user_id)
            .await?
            .filter(|p| p.belongs_to(snapshot.synced_at_ms));

        Ok(EnrichmentReport {
            synced_at_ms: snapshot.synced_at_ms,
            item_count: snapshot.items.len(),
            need: snapshot.enrichment_need(),
            progress,
        })
    }

    /// Run one batch under the user's run lock
    pub async fn run_batch(&self, user_id: &str) -> Result<EnrichOutcome, PipelineError> {
        let Some(token) = self.lock.acquire(user_id).await? else {
            info!(user_id = %user_id, "Enrichment batch skipped: another run in progress");
            return Ok(EnrichOutcome::Busy);
        };

        let result = self.run_locked_batch(user_id, &token).await;
        self.lock.release(user_id, &token).await;

        if let Err(e) = &result {
            error!(user_id = %user_id, error = %e, "Enrichment batch aborted");
        }
        result
    }

    /// Run batches until the snapshot is complete
    ///
    /// This is the queue consumer. It is idempotent: a duplicate delivery
    /// finds the progress complete and returns at once. A held run lock is
    /// waited out for up to `lock_ttl`, long enough for a crashed holder's
    /// lock to expire, before giving up with `Busy`.
    pub async fn drain(&self, user_id: &str) -> Result<EnrichOutcome, PipelineError> {
        let max_batches = self.settings.max_batches_per_drain.max(1);
        let mut batches = 0;
        let mut waited = Duration::ZERO;
        let mut last = None;

        while batches < max_batches {
            match self.run_batch(user_id).await? {
                EnrichOutcome::Busy => {
                    if waited >= self.settings.lock_ttl {
                        warn!(
                            user_id = %user_id,
                            waited_ms = waited.as_millis() as u64,
                            "Enrichment drain gave up waiting for the run lock"
                        );
                        return Ok(EnrichOutcome::Busy);
                    }
                    let pause = BUSY_RETRY_INTERVAL.min(self.settings.lock_ttl - waited);
                    debug!(
                        user_id = %user_id,
                        wait_ms = pause.as_millis() as u64,
                        "Run lock held, retrying drain"
                    );
                    self.clock.sleep(pause).await;
                    waited += pause;
                }
                EnrichOutcome::Batch(progress) if !progress.is_complete() => {
                    batches += 1;
                    waited = Duration::ZERO;
                    last = Some(progress);
                }
                EnrichOutcome::Batch(progress) => return Ok(EnrichOutcome::Complete(progress)),
                other => return Ok(other),
            }
        }

        warn!(
            user_id = %user_id,
            max_batches = self.settings.max_batches_per_drain,
            "Enrichment drain stopped at batch limit"
        );
        Ok(last.map_or(EnrichOutcome::Busy, EnrichOutcome::Batch))
    }

    async fn run_locked_batch(
        &self,
        user_id: &str,
        token: &str,
    ) -> Result<EnrichOutcome, PipelineError> {
        let mut snapshot = self.load_snapshot(user_id).await?;
        let need = snapshot.enrichment_need();
        let now = self.clock.now_ms();

        let mut progress = match self.load_progress(user_id).await? {
            Some(progress) if progress.belongs_to(snapshot.synced_at_ms) => progress,
            stale => {
                if stale.is_some() {
                    info!(user_id = %user_id, "Discarding enrichment progress of a replaced snapshot");
                }
                EnrichmentProgress::start(user_id, snapshot.synced_at_ms, &need, now)
            }
        };

        if progress.is_complete() {
            return Ok(EnrichOutcome::Complete(progress));
        }

        let selected: Vec<(usize, u64)> = snapshot
            .items
            .iter()
            .enumerate()
            .skip(progress.cursor)
            .filter(|(_, item)| item.needs_enrichment())
            .filter_map(|(idx, item)| item.master_id.map(|id| (idx, id)))
            .take(self.settings.batch_size.max(1))
            .collect();

        if selected.is_empty() {
            progress.cursor = snapshot.items.len();
            let (processed, failed) = snapshot.attempted_before(progress.cursor);
            progress.processed_count = processed;
            progress.error_count = failed;
            progress.remaining_count = 0;
            progress.status = ProgressStatus::Complete;
            progress.updated_at_ms = now;
            self.save_progress(&progress).await?;
            return Ok(EnrichOutcome::Batch(progress));
        }

        debug!(
            user_id = %user_id,
            cursor = progress.cursor,
            batch = selected.len(),
            "Enrichment batch starting"
        );

        let Some(results) = self.lookup_masters(user_id, token, &selected).await else {
            warn!(user_id = %user_id, "Enrichment lock taken over mid-batch, discarding results");
            return Ok(EnrichOutcome::Busy);
        };

        if let Some(systemic) = results
            .iter()
            .find_map(|(_, r)| r.as_ref().err().filter(|e| e.is_systemic()))
        {
            return Err(PipelineError::Upstream(systemic.clone()));
        }

        for (idx, result) in results {
            let item = &mut snapshot.items[idx];
            match result {
                Ok(Lookup::Found(master)) => {
                    item.enrichment = Some(master);
                    item.enrichment_status = EnrichmentStatus::Enriched;
                }
                Ok(Lookup::NotFound) => {
                    item.enrichment_status = EnrichmentStatus::NotFound;
                }
                Err(e) => {
                    warn!(
                        user_id = %user_id,
                        master_id = ?item.master_id,
                        error = %e,
                        "Enrichment lookup failed"
                    );
                    item.enrichment_status = EnrichmentStatus::Failed;
                }
            }
        }

        if let Some((last_idx, _)) = selected.last() {
            progress.cursor = last_idx + 1;
        }
        // Derived from item statuses, not accumulated
        let (processed, failed) = snapshot.attempted_before(progress.cursor);
        progress.processed_count = processed;
        progress.error_count = failed;
        progress.remaining_count = snapshot.remaining_from(progress.cursor);
        if progress.remaining_count == 0 {
            progress.status = ProgressStatus::Complete;
        }
        progress.updated_at_ms = self.clock.now_ms();
        snapshot.refresh_stats();

        // A sync may have replaced the snapshot while we were fetching
        let current = self.load_snapshot(user_id).await?;
        if current.synced_at_ms != snapshot.synced_at_ms {
            info!(user_id = %user_id, "Snapshot replaced during enrichment batch, discarding results");
            return Ok(EnrichOutcome::Superseded);
        }

        put_json(
            self.store.as_ref(),
            &keys::collection_snapshot(user_id),
            &snapshot,
            None,
        )
        .await?;
        self.save_progress(&progress).await?;

        info!(
            user_id = %user_id,
            processed = progress.processed_count,
            remaining = progress.remaining_count,
            errors = progress.error_count,
            complete = progress.is_complete(),
            "Enrichment batch persisted"
        );

        Ok(EnrichOutcome::Batch(progress))
    }

    /// Bounded concurrent lookups; each item's result is independent
    ///
    /// The run lock is renewed once half its TTL has passed since the last
    /// renewal. Returns `None` if the lock was lost to another run.
    async fn lookup_masters(
        &self,
        user_id: &str,
        token: &str,
        selected: &[(usize, u64)],
    ) -> Option<Vec<(usize, Result<Lookup<MasterEnrichment>, UpstreamError>)>> {
        let renew_after_ms = (self.settings.lock_ttl.as_millis() / 2) as i64;
        let mut renewed_at = self.clock.now_ms();
        let mut results = Vec::with_capacity(selected.len());

        let mut lookups = stream::iter(selected.iter().copied())
            .map(|(idx, master_id)| async move {
                let param = master_id.to_string();
                let result = self
                    .cache
                    .get_or_fetch(CacheTask::MasterDetails, &[&param], || {
                        self.source.fetch_master(master_id)
                    })
                    .await;
                (idx, result)
            })
            .buffer_unordered(self.settings.concurrency.max(1));

        while let Some(entry) = lookups.next().await {
            results.push(entry);

            let now = self.clock.now_ms();
            if now - renewed_at < renew_after_ms {
                continue;
            }
            match self.lock.renew(user_id, token).await {
                Ok(true) => renewed_at = now,
                Ok(false) => return None,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Failed to renew enrichment lock");
                }
            }
        }

        Some(results)
    }

    async fn load_snapshot(&self, user_id: &str) -> Result<CollectionSnapshot, PipelineError> {
        get_json(self.store.as_ref(), &keys::collection_snapshot(user_id))
            .await?
            .ok_or_else(|| PipelineError::NotSynced(user_id.to_string()))
    }

    async fn load_progress(&self, user_id: &str) -> Result<Option<EnrichmentProgress>, PipelineError> {
        Ok(get_json(self.store.as_ref(), &keys::enrich_progress(user_id)).await?)
    }

    async fn save_progress(&self, progress: &EnrichmentProgress) -> Result<(), PipelineError> {
        put_json(
            self.store.as_ref(),
            &keys::enrich_progress(&progress.user_id),
            progress,
            None,
        )
        .await?;
        Ok(())
    }
}
