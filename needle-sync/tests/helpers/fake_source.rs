//! In-process collection source with call counting

use async_trait::async_trait;
use needle_sync::clock::ManualClock;
use needle_sync::models::{
    CollectionItem, CollectionPage, CollectionSnapshot, EnrichmentStatus, MasterEnrichment,
};
use needle_sync::services::orchestrator::RunLock;
use needle_sync::services::providers::CollectionSource;
use needle_sync::services::upstream::{Lookup, UpstreamError};
use needle_sync::store::{keys, put_json, KvStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// `count` items; item `i` (1-based) has master id `1000 + i`
pub fn collection_items(count: u64) -> Vec<CollectionItem> {
    (1..=count)
        .map(|i| CollectionItem {
            instance_id: i,
            release_id: 500 + i,
            master_id: Some(1000 + i),
            artist: format!("Artist {}", i % 3),
            title: format!("Album {}", i),
            year: Some(1990 + i as i32),
            formats: vec!["Vinyl".to_string()],
            genres: vec!["Rock".to_string()],
            styles: vec![],
            added_at_ms: None,
            cover_image: None,
            enrichment_status: EnrichmentStatus::Pending,
            enrichment: None,
        })
        .collect()
}

pub fn master(master_id: u64) -> MasterEnrichment {
    MasterEnrichment {
        master_id,
        original_year: Some(1980),
        genres: vec!["Electronic".to_string()],
        styles: vec!["Ambient".to_string()],
        track_count: 9,
        main_release_id: Some(master_id * 10),
        cover_image: None,
    }
}

#[derive(Default)]
pub struct FakeCollectionSource {
    pages: Vec<CollectionPage>,
    page_error: Mutex<Option<(u32, UpstreamError)>>,
    master_overrides: Mutex<HashMap<u64, Result<Lookup<MasterEnrichment>, UpstreamError>>>,
    supersede: Mutex<Option<(Arc<dyn KvStore>, CollectionSnapshot)>>,
    lookup_delay: Mutex<Option<(Arc<ManualClock>, Duration)>>,
    contender: Mutex<Option<(usize, String, RunLock)>>,
    contender_results: Mutex<Vec<bool>>,
    page_calls: AtomicUsize,
    master_calls: AtomicUsize,
}

impl FakeCollectionSource {
    /// Serve `items` split into pages of `page_size`
    pub fn with_items(items: Vec<CollectionItem>, page_size: usize) -> Self {
        let chunks: Vec<Vec<CollectionItem>> = if items.is_empty() {
            vec![Vec::new()]
        } else {
            items.chunks(page_size).map(|c| c.to_vec()).collect()
        };
        let pages = chunks.len() as u32;
        Self {
            pages: chunks
                .into_iter()
                .enumerate()
                .map(|(i, items)| CollectionPage {
                    page: i as u32 + 1,
                    pages,
                    items,
                })
                .collect(),
            ..Default::default()
        }
    }

    /// Fail when `page` is requested
    pub fn fail_page(&self, page: u32, error: UpstreamError) {
        *self.page_error.lock().unwrap() = Some((page, error));
    }

    /// Answer for one master id; others resolve to [`master`]
    pub fn set_master(&self, master_id: u64, result: Result<Lookup<MasterEnrichment>, UpstreamError>) {
        self.master_overrides.lock().unwrap().insert(master_id, result);
    }

    /// On the next master lookup, overwrite the stored snapshot (a concurrent re-sync)
    pub fn supersede_on_next_lookup(&self, store: Arc<dyn KvStore>, snapshot: CollectionSnapshot) {
        *self.supersede.lock().unwrap() = Some((store, snapshot));
    }

    /// Each master lookup advances `clock` by `per_lookup`
    pub fn slow_lookups(&self, clock: Arc<ManualClock>, per_lookup: Duration) {
        *self.lookup_delay.lock().unwrap() = Some((clock, per_lookup));
    }

    /// During the `nth` master lookup (1-based), a competing run tries to
    /// take `user_id`'s run lock
    pub fn contend_lock_at(&self, nth: usize, user_id: &str, lock: RunLock) {
        *self.contender.lock().unwrap() = Some((nth, user_id.to_string(), lock));
    }

    /// Whether each competing acquire succeeded
    pub fn contender_results(&self) -> Vec<bool> {
        self.contender_results.lock().unwrap().clone()
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn master_calls(&self) -> usize {
        self.master_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CollectionSource for FakeCollectionSource {
    async fn fetch_collection_page(
        &self,
        _username: &str,
        page: u32,
    ) -> Result<CollectionPage, UpstreamError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);

        let failure = self.page_error.lock().unwrap().clone();
        if let Some((failing_page, error)) = failure {
            if failing_page == page {
                return Err(error);
            }
        }

        Ok(self
            .pages
            .get(page as usize - 1)
            .cloned()
            .unwrap_or(CollectionPage {
                page,
                pages: self.pages.len() as u32,
                items: Vec::new(),
            }))
    }

    async fn fetch_master(&self, master_id: u64) -> Result<Lookup<MasterEnrichment>, UpstreamError> {
        let call = self.master_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = self.lookup_delay.lock().unwrap().clone();
        if let Some((clock, per_lookup)) = delay {
            clock.advance(per_lookup);
        }

        let due = {
            let mut contender = self.contender.lock().unwrap();
            match contender.as_ref() {
                Some((nth, _, _)) if *nth == call => contender.take(),
                _ => None,
            }
        };
        if let Some((_, user_id, lock)) = due {
            let acquired = lock.acquire(&user_id).await.unwrap().is_some();
            self.contender_results.lock().unwrap().push(acquired);
        }

        let supersede = self.supersede.lock().unwrap().take();
        if let Some((store, snapshot)) = supersede {
            put_json(
                store.as_ref(),
                &keys::collection_snapshot(&snapshot.user_id),
                &snapshot,
                None,
            )
            .await
            .unwrap();
        }

        let overridden = self.master_overrides.lock().unwrap().get(&master_id).cloned();
        overridden.unwrap_or_else(|| Ok(Lookup::Found(master(master_id))))
    }
}
