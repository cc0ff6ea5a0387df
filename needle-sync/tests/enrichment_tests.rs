//! Enrichment pipeline integration tests
//!
//! Run against a MemoryStore, a ManualClock and an in-process collection
//! source so batch boundaries and call counts are exact.

mod helpers;

use helpers::{collection_items, memory_env, FakeCollectionSource, START_MS};
use needle_sync::clock::ManualClock;
use needle_sync::models::{
    CollectionSnapshot, EnrichmentProgress, EnrichmentStatus, ProgressStatus,
};
use needle_sync::queue::{handle_message, ChannelQueue, QueueMessage};
use needle_sync::services::orchestrator::{
    EnrichOutcome, EnrichmentRunner, EnrichmentSettings, PipelineError,
};
use needle_sync::services::response_cache::ResponseCache;
use needle_sync::services::upstream::{Lookup, Service, TransientKind, UpstreamError};
use needle_sync::store::{get_json, keys, put_json, KvStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

const USER: &str = "user-1";

struct Env {
    clock: Arc<ManualClock>,
    store: Arc<MemoryStore>,
    source: Arc<FakeCollectionSource>,
}

impl Env {
    /// Store a snapshot of `snapshot_items` and prepare a source
    async fn new(snapshot_items: Vec<needle_sync::models::CollectionItem>) -> Self {
        let (clock, store) = memory_env();
        let snapshot = CollectionSnapshot::new(USER, "digger", START_MS, snapshot_items);
        put_json(store.as_ref(), &keys::collection_snapshot(USER), &snapshot, None)
            .await
            .unwrap();
        Self {
            clock,
            store,
            source: Arc::new(FakeCollectionSource::default()),
        }
    }

    fn runner(&self, batch_size: usize) -> EnrichmentRunner {
        EnrichmentRunner::new(
            self.store.clone(),
            self.clock.clone(),
            self.source.clone(),
            Arc::new(ResponseCache::new(self.store.clone())),
            EnrichmentSettings {
                batch_size,
                ..Default::default()
            },
        )
    }

    async fn snapshot(&self) -> CollectionSnapshot {
        get_json(self.store.as_ref(), &keys::collection_snapshot(USER))
            .await
            .unwrap()
            .unwrap()
    }

    async fn progress(&self) -> Option<EnrichmentProgress> {
        get_json(self.store.as_ref(), &keys::enrich_progress(USER))
            .await
            .unwrap()
    }
}

fn batch(outcome: EnrichOutcome) -> EnrichmentProgress {
    match outcome {
        EnrichOutcome::Batch(progress) => progress,
        other => panic!("expected a batch, got {:?}", other),
    }
}

/// 10 enrichable items, batch size 4: remaining goes 6, 2, 0
#[tokio::test]
async fn test_batches_resume_from_cursor_until_complete() {
    let env = Env::new(collection_items(10)).await;
    let runner = env.runner(4);

    let first = batch(runner.enrich(USER, "digger").await.unwrap());
    assert_eq!(first.remaining_count, 6);
    assert_eq!(first.cursor, 4);
    assert_eq!(first.status, ProgressStatus::InProgress);

    let second = batch(runner.enrich(USER, "digger").await.unwrap());
    assert_eq!(second.remaining_count, 2);

    let third = batch(runner.enrich(USER, "digger").await.unwrap());
    assert_eq!(third.remaining_count, 0);
    assert_eq!(third.processed_count, 10);
    assert_eq!(third.status, ProgressStatus::Complete);
    assert_eq!(env.source.master_calls(), 10);

    let snapshot = env.snapshot().await;
    assert!(snapshot
        .items
        .iter()
        .all(|i| i.enrichment_status == EnrichmentStatus::Enriched));
    assert_eq!(snapshot.stats.enriched_items, 10);
    assert_eq!(snapshot.enrichment_need().needs_enrichment, 0);
}

#[tokio::test]
async fn test_rerun_after_completion_makes_no_calls() {
    let env = Env::new(collection_items(3)).await;
    let runner = env.runner(25);

    batch(runner.enrich(USER, "digger").await.unwrap());
    let calls = env.source.master_calls();

    // Given: progress is complete for the current snapshot
    // When: enrichment is requested again
    let outcome = runner.enrich(USER, "digger").await.unwrap();

    // Then: it reports completion without touching the upstream
    assert!(matches!(outcome, EnrichOutcome::Complete(ref p) if p.remaining_count == 0));
    assert_eq!(env.source.master_calls(), calls);
}

#[tokio::test]
async fn test_nothing_to_enrich_completes_immediately() {
    let mut items = collection_items(3);
    for item in &mut items {
        item.master_id = None;
    }
    let env = Env::new(items).await;

    let outcome = env.runner(4).enrich(USER, "digger").await.unwrap();

    assert!(matches!(outcome, EnrichOutcome::Complete(_)));
    assert_eq!(env.source.master_calls(), 0);
    assert!(env.progress().await.is_none());
}

#[tokio::test]
async fn test_items_without_external_id_are_skipped() {
    let mut items = collection_items(6);
    items[1].master_id = None;
    items[4].master_id = None;
    let env = Env::new(items).await;

    let progress = batch(env.runner(10).run_batch(USER).await.unwrap());

    assert_eq!(progress.remaining_count, 0);
    assert_eq!(progress.processed_count, 4);
    assert_eq!(env.source.master_calls(), 4);
    let snapshot = env.snapshot().await;
    assert_eq!(snapshot.items[1].enrichment_status, EnrichmentStatus::Pending);
}

#[tokio::test]
async fn test_failures_and_not_found_are_recorded_per_item() {
    let env = Env::new(collection_items(4)).await;
    env.source.set_master(1002, Ok(Lookup::NotFound));
    env.source.set_master(
        1003,
        Err(UpstreamError::transient(
            Service::Collection,
            TransientKind::Server(503),
            "HTTP 503",
        )),
    );

    let progress = batch(env.runner(10).run_batch(USER).await.unwrap());

    assert_eq!(progress.processed_count, 3);
    assert_eq!(progress.error_count, 1);
    assert_eq!(progress.remaining_count, 0);
    assert!(progress.is_complete());

    let snapshot = env.snapshot().await;
    let statuses: Vec<_> = snapshot.items.iter().map(|i| i.enrichment_status).collect();
    assert_eq!(
        statuses,
        vec![
            EnrichmentStatus::Enriched,
            EnrichmentStatus::NotFound,
            EnrichmentStatus::Failed,
            EnrichmentStatus::Enriched,
        ]
    );

    // Failed items are not retried within the completed run
    let calls = env.source.master_calls();
    assert!(matches!(
        env.runner(10).enrich(USER, "digger").await.unwrap(),
        EnrichOutcome::Complete(_)
    ));
    assert_eq!(env.source.master_calls(), calls);
}

#[tokio::test]
async fn test_counts_stay_exact_when_progress_write_is_lost() {
    let env = Env::new(collection_items(4)).await;
    env.source.set_master(
        1002,
        Err(UpstreamError::transient(Service::Collection, TransientKind::Timeout, "slow")),
    );
    let runner = env.runner(2);
    let first = batch(runner.run_batch(USER).await.unwrap());
    assert_eq!((first.processed_count, first.error_count), (1, 1));

    // Given: the snapshot of that batch was saved but its progress was not
    env.store.delete(&keys::enrich_progress(USER)).await.unwrap();

    // When: the next batch starts over from the old cursor
    let second = batch(runner.run_batch(USER).await.unwrap());

    // Then: the retried failure is counted once and earlier successes are kept
    assert_eq!(second.cursor, 3);
    assert_eq!(second.processed_count, 2);
    assert_eq!(second.error_count, 1);
    assert_eq!(second.remaining_count, 1);

    let last = batch(runner.run_batch(USER).await.unwrap());
    assert!(last.is_complete());
    assert_eq!((last.processed_count, last.error_count), (3, 1));
}

#[tokio::test]
async fn test_cached_masters_are_not_refetched() {
    let env = Env::new(collection_items(2)).await;
    env.runner(10).run_batch(USER).await.unwrap();
    assert_eq!(env.source.master_calls(), 2);

    // A replaced snapshot with the same masters resolves from cache
    let snapshot = CollectionSnapshot::new(USER, "digger", START_MS + 1, collection_items(2));
    put_json(env.store.as_ref(), &keys::collection_snapshot(USER), &snapshot, None)
        .await
        .unwrap();

    let progress = batch(env.runner(10).run_batch(USER).await.unwrap());
    assert_eq!(progress.processed_count, 2);
    assert_eq!(progress.snapshot_synced_at_ms, START_MS + 1);
    assert_eq!(env.source.master_calls(), 2);
}

#[tokio::test]
async fn test_systemic_failure_aborts_without_persisting() {
    let env = Env::new(collection_items(4)).await;
    env.source.set_master(
        1002,
        Err(UpstreamError::permanent(Service::Collection, Some(401), "bad token")),
    );

    let result = env.runner(4).run_batch(USER).await;

    assert!(matches!(result, Err(PipelineError::Upstream(ref e)) if e.is_systemic()));
    assert!(env.progress().await.is_none());
    assert!(env
        .snapshot()
        .await
        .items
        .iter()
        .all(|i| i.enrichment_status == EnrichmentStatus::Pending));
    // The lock is released for the next attempt
    assert!(env.store.keys().iter().all(|k| !k.starts_with("enrich:lock:")));
}

#[tokio::test]
async fn test_store_failure_is_fatal() {
    let env = Env::new(collection_items(2)).await;
    env.store.set_available(false);

    let result = env.runner(4).enrich(USER, "digger").await;

    assert!(matches!(result, Err(PipelineError::StoreUnavailable(_))));
    assert_eq!(env.source.master_calls(), 0);
}

#[tokio::test]
async fn test_missing_snapshot_is_not_synced() {
    let (clock, store) = memory_env();
    let runner = EnrichmentRunner::new(
        store.clone(),
        clock,
        Arc::new(FakeCollectionSource::default()),
        Arc::new(ResponseCache::new(store)),
        EnrichmentSettings::default(),
    );

    let result = runner.enrich("nobody", "nobody").await;
    assert!(matches!(result, Err(PipelineError::NotSynced(ref u)) if u == "nobody"));
}

#[tokio::test]
async fn test_concurrent_run_is_busy() {
    let env = Env::new(collection_items(4)).await;

    // Given: another invocation holds the user's run lock
    let holder = needle_sync::services::orchestrator::RunLock::new(
        env.store.clone(),
        env.clock.clone(),
        Duration::from_secs(300),
    );
    let token = holder.acquire(USER).await.unwrap().unwrap();

    // Then: this invocation backs off without doing any work
    assert_eq!(env.runner(4).run_batch(USER).await.unwrap(), EnrichOutcome::Busy);
    assert_eq!(env.source.master_calls(), 0);

    holder.release(USER, &token).await;
    assert!(matches!(
        env.runner(4).run_batch(USER).await.unwrap(),
        EnrichOutcome::Batch(_)
    ));
}

#[tokio::test]
async fn test_delivered_message_waits_out_a_held_lock() {
    let env = Env::new(collection_items(5)).await;

    // Given: a crashed invocation left the run lock behind
    let holder = needle_sync::services::orchestrator::RunLock::new(
        env.store.clone(),
        env.clock.clone(),
        EnrichmentSettings::default().lock_ttl,
    );
    holder.acquire(USER).await.unwrap().unwrap();

    // When: the queued message is delivered
    let message = QueueMessage::EnrichCollection {
        user_id: USER.to_string(),
        external_username: "digger".to_string(),
    };
    let outcome = handle_message(&env.runner(2), message).await.unwrap();

    // Then: the consumer waits for the lock to expire and finishes the run
    assert!(matches!(outcome, EnrichOutcome::Complete(ref p) if p.processed_count == 5));
    assert_eq!(env.source.master_calls(), 5);
    assert_eq!(env.clock.total_slept(), EnrichmentSettings::default().lock_ttl);
    assert!(env.progress().await.map_or(false, |p| p.is_complete()));
}

#[tokio::test]
async fn test_drain_gives_up_when_lock_outlives_the_wait() {
    let env = Env::new(collection_items(3)).await;

    // Given: a holder whose lock lasts longer than this runner waits
    let holder = needle_sync::services::orchestrator::RunLock::new(
        env.store.clone(),
        env.clock.clone(),
        Duration::from_secs(600),
    );
    holder.acquire(USER).await.unwrap().unwrap();
    let runner = EnrichmentRunner::new(
        env.store.clone(),
        env.clock.clone(),
        env.source.clone(),
        Arc::new(ResponseCache::new(env.store.clone())),
        EnrichmentSettings {
            lock_ttl: Duration::from_secs(12),
            ..Default::default()
        },
    );

    assert_eq!(runner.drain(USER).await.unwrap(), EnrichOutcome::Busy);
    assert_eq!(
        env.clock.sleeps(),
        vec![
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(2),
        ]
    );
    assert_eq!(env.source.master_calls(), 0);
}

fn slow_runner(env: &Env, lock_ttl: Duration) -> EnrichmentRunner {
    EnrichmentRunner::new(
        env.store.clone(),
        env.clock.clone(),
        env.source.clone(),
        Arc::new(ResponseCache::new(env.store.clone())),
        EnrichmentSettings {
            batch_size: 4,
            concurrency: 1,
            lock_ttl,
            ..Default::default()
        },
    )
}

fn competitor(env: &Env) -> needle_sync::services::orchestrator::RunLock {
    needle_sync::services::orchestrator::RunLock::new(
        env.store.clone(),
        env.clock.clone(),
        Duration::from_secs(60),
    )
}

#[tokio::test]
async fn test_long_batch_keeps_its_lock() {
    let env = Env::new(collection_items(4)).await;

    // Given: four 25s lookups against a 60s lock, and a competitor that
    // tries to start a run during the third lookup (75s in)
    env.source
        .slow_lookups(env.clock.clone(), Duration::from_secs(25));
    env.source.contend_lock_at(3, USER, competitor(&env));

    let progress = batch(slow_runner(&env, Duration::from_secs(60)).run_batch(USER).await.unwrap());

    // Then: the renewed lock kept the competitor out and the batch finished
    assert_eq!(env.source.contender_results(), vec![false]);
    assert_eq!(progress.processed_count, 4);
    assert!(progress.is_complete());
}

#[tokio::test]
async fn test_batch_that_loses_its_lock_persists_nothing() {
    let env = Env::new(collection_items(4)).await;

    // Given: a single lookup outlasts the whole lock TTL, so a competitor
    // takes the expired lock before the first renewal
    env.source
        .slow_lookups(env.clock.clone(), Duration::from_secs(70));
    env.source.contend_lock_at(1, USER, competitor(&env));

    let outcome = slow_runner(&env, Duration::from_secs(60)).run_batch(USER).await.unwrap();

    assert_eq!(outcome, EnrichOutcome::Busy);
    assert_eq!(env.source.contender_results(), vec![true]);
    assert_eq!(env.source.master_calls(), 1);
    assert!(env.progress().await.is_none());
    assert!(env
        .snapshot()
        .await
        .items
        .iter()
        .all(|item| item.enrichment_status == EnrichmentStatus::Pending));
}

#[tokio::test]
async fn test_progress_of_replaced_snapshot_is_discarded() {
    let env = Env::new(collection_items(8)).await;
    let first = batch(env.runner(4).run_batch(USER).await.unwrap());
    assert_eq!(first.cursor, 4);

    let resynced = CollectionSnapshot::new(USER, "digger", START_MS + 60_000, collection_items(8));
    put_json(env.store.as_ref(), &keys::collection_snapshot(USER), &resynced, None)
        .await
        .unwrap();

    let progress = batch(env.runner(4).run_batch(USER).await.unwrap());
    assert_eq!(progress.snapshot_synced_at_ms, START_MS + 60_000);
    assert_eq!(progress.cursor, 4);
    assert_eq!(progress.remaining_count, 4);
    assert_eq!(progress.processed_count, 4);
}

#[tokio::test]
async fn test_batch_superseded_by_resync_is_discarded() {
    let env = Env::new(collection_items(4)).await;
    let resynced = CollectionSnapshot::new(USER, "digger", START_MS + 1_000, collection_items(2));
    env.source
        .supersede_on_next_lookup(env.store.clone(), resynced.clone());

    let outcome = env.runner(4).run_batch(USER).await.unwrap();

    assert_eq!(outcome, EnrichOutcome::Superseded);
    assert_eq!(env.snapshot().await, resynced);
    assert!(env.progress().await.is_none());
}

#[tokio::test]
async fn test_drain_runs_to_completion() {
    let env = Env::new(collection_items(10)).await;

    let outcome = env.runner(3).drain(USER).await.unwrap();

    assert!(matches!(outcome, EnrichOutcome::Complete(ref p) if p.remaining_count == 0 && p.processed_count == 10));
    assert_eq!(env.source.master_calls(), 10);
}

#[tokio::test]
async fn test_drain_stops_at_batch_limit() {
    let env = Env::new(collection_items(10)).await;
    let runner = EnrichmentRunner::new(
        env.store.clone(),
        env.clock.clone(),
        env.source.clone(),
        Arc::new(ResponseCache::new(env.store.clone())),
        EnrichmentSettings {
            batch_size: 2,
            max_batches_per_drain: 2,
            ..Default::default()
        },
    );

    let progress = batch(runner.drain(USER).await.unwrap());
    assert_eq!(progress.remaining_count, 6);
}

#[tokio::test]
async fn test_queue_handoff_and_idempotent_consumer() {
    let env = Env::new(collection_items(5)).await;
    let (queue, mut receiver) = ChannelQueue::new(8);
    let front = env.runner(2).with_queue(Arc::new(queue));

    // Given: a queue is configured
    // When: enrichment is requested
    let outcome = front.enrich(USER, "digger").await.unwrap();

    // Then: exactly one message is submitted and no work is done inline
    assert_eq!(outcome, EnrichOutcome::Queued);
    assert_eq!(env.source.master_calls(), 0);
    let message = receiver.try_recv().unwrap().unwrap();
    assert_eq!(
        message,
        QueueMessage::EnrichCollection {
            user_id: USER.to_string(),
            external_username: "digger".to_string(),
        }
    );
    assert!(receiver.try_recv().is_none());

    // The consumer drains everything
    let consumer = env.runner(2);
    let outcome = handle_message(&consumer, message.clone()).await.unwrap();
    assert!(matches!(outcome, EnrichOutcome::Complete(_)));
    assert_eq!(env.source.master_calls(), 5);

    // A duplicate delivery is a no-op
    let outcome = handle_message(&consumer, message).await.unwrap();
    assert!(matches!(outcome, EnrichOutcome::Complete(_)));
    assert_eq!(env.source.master_calls(), 5);

    // Once complete, the front door answers without queueing
    assert!(matches!(
        front.enrich(USER, "digger").await.unwrap(),
        EnrichOutcome::Complete(_)
    ));
    assert!(receiver.try_recv().is_none());
}

#[tokio::test]
async fn test_report_reflects_current_snapshot() {
    let env = Env::new(collection_items(5)).await;
    let runner = env.runner(2);

    let before = runner.report(USER).await.unwrap();
    assert_eq!(before.item_count, 5);
    assert_eq!(before.need.needs_enrichment, 5);
    assert!(before.progress.is_none());

    runner.run_batch(USER).await.unwrap();
    let after = runner.report(USER).await.unwrap();
    assert_eq!(after.need.needs_enrichment, 3);
    assert_eq!(after.progress.map(|p| p.remaining_count), Some(3));
}

#[tokio::test]
async fn test_remaining_never_increases_across_batches() {
    let mut items = collection_items(12);
    items[3].master_id = None;
    let env = Env::new(items).await;
    env.source.set_master(
        1006,
        Err(UpstreamError::transient(Service::Collection, TransientKind::Timeout, "slow")),
    );
    let runner = env.runner(3);

    let mut last = usize::MAX;
    loop {
        let progress = batch(runner.run_batch(USER).await.unwrap());
        assert!(progress.remaining_count <= last);
        last = progress.remaining_count;
        if progress.is_complete() {
            break;
        }
    }
    assert_eq!(last, 0);

    let progress = env.progress().await.unwrap();
    assert_eq!(progress.processed_count + progress.error_count, 11);
    assert_eq!(progress.error_count, 1);
}
