//! Record collection entities
//!
//! A [`CollectionSnapshot`] is the complete set of a user's collection items
//! as last fetched, plus aggregates derived from them. It is replaced
//! wholesale on each successful sync and only ever mutated by enrichment.

use super::enrichment::{EnrichmentNeed, EnrichmentStatus, MasterEnrichment};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One entry in a user's collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionItem {
    /// Collection-instance id (unique per user, a release can be owned twice)
    pub instance_id: u64,
    pub release_id: u64,
    /// External id used for enrichment; `None` when the release has no master
    pub master_id: Option<u64>,
    pub artist: String,
    pub title: String,
    pub year: Option<i32>,
    pub formats: Vec<String>,
    pub genres: Vec<String>,
    pub styles: Vec<String>,
    pub added_at_ms: Option<i64>,
    pub cover_image: Option<String>,
    #[serde(default)]
    pub enrichment_status: EnrichmentStatus,
    #[serde(default)]
    pub enrichment: Option<MasterEnrichment>,
}

impl CollectionItem {
    pub fn has_external_id(&self) -> bool {
        self.master_id.is_some()
    }

    /// Enrichable and without a definitive answer yet
    pub fn needs_enrichment(&self) -> bool {
        self.has_external_id() && !self.enrichment_status.is_resolved()
    }
}

/// One page of a paginated collection listing
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionPage {
    pub page: u32,
    pub pages: u32,
    pub items: Vec<CollectionItem>,
}

/// Aggregate statistics over a snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
    pub total_items: usize,
    pub distinct_artists: usize,
    pub enriched_items: usize,
    pub by_format: BTreeMap<String, usize>,
    pub by_genre: BTreeMap<String, usize>,
    /// Keyed by decade label, e.g. `1990s`; uses the original year when enriched
    pub by_decade: BTreeMap<String, usize>,
}

impl CollectionStats {
    pub fn compute(items: &[CollectionItem]) -> Self {
        let mut stats = CollectionStats {
            total_items: items.len(),
            ..Default::default()
        };
        let mut artists = BTreeSet::new();

        for item in items {
            artists.insert(item.artist.to_lowercase());

            if item.enrichment_status == EnrichmentStatus::Enriched {
                stats.enriched_items += 1;
            }

            // A double LP listed as "Vinyl, Vinyl" counts once
            let formats: BTreeSet<&String> = item.formats.iter().collect();
            for format in formats {
                *stats.by_format.entry(format.clone()).or_default() += 1;
            }

            let genres = item
                .enrichment
                .as_ref()
                .filter(|e| !e.genres.is_empty())
                .map(|e| &e.genres)
                .unwrap_or(&item.genres);
            for genre in genres {
                *stats.by_genre.entry(genre.clone()).or_default() += 1;
            }

            let year = item
                .enrichment
                .as_ref()
                .and_then(|e| e.original_year)
                .or(item.year);
            if let Some(year) = year {
                *stats.by_decade.entry(decade_label(year)).or_default() += 1;
            }
        }

        stats.distinct_artists = artists.len();
        stats
    }
}

fn decade_label(year: i32) -> String {
    format!("{}s", year - year.rem_euclid(10))
}

/// A user's full collection as of `synced_at_ms`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSnapshot {
    pub user_id: String,
    pub external_username: String,
    /// Also serves as the snapshot's identity for enrichment progress
    pub synced_at_ms: i64,
    pub items: Vec<CollectionItem>,
    pub stats: CollectionStats,
}

impl CollectionSnapshot {
    pub fn new(
        user_id: impl Into<String>,
        external_username: impl Into<String>,
        synced_at_ms: i64,
        items: Vec<CollectionItem>,
    ) -> Self {
        let stats = CollectionStats::compute(&items);
        Self {
            user_id: user_id.into(),
            external_username: external_username.into(),
            synced_at_ms,
            items,
            stats,
        }
    }

    pub fn refresh_stats(&mut self) {
        self.stats = CollectionStats::compute(&self.items);
    }

    pub fn enrichment_need(&self) -> EnrichmentNeed {
        let mut need = EnrichmentNeed {
            total_items: self.items.len(),
            ..Default::default()
        };
        for item in &self.items {
            if !item.has_external_id() {
                need.no_external_id += 1;
            } else if item.enrichment_status.is_resolved() {
                need.already_enriched += 1;
            } else {
                need.needs_enrichment += 1;
            }
        }
        need
    }

    /// Items before `cursor` with an external id, as (resolved, failed)
    ///
    /// A snapshot starts with every item pending, so these are the outcomes
    /// of the current run up to the cursor.
    pub fn attempted_before(&self, cursor: usize) -> (usize, usize) {
        self.items
            .iter()
            .take(cursor)
            .filter(|item| item.has_external_id())
            .fold((0, 0), |(resolved, failed), item| match item.enrichment_status {
                status if status.is_resolved() => (resolved + 1, failed),
                EnrichmentStatus::Failed => (resolved, failed + 1),
                _ => (resolved, failed),
            })
    }

    /// Items at or after `cursor` that still need enrichment
    pub fn remaining_from(&self, cursor: usize) -> usize {
        self.items
            .iter()
            .skip(cursor)
            .filter(|item| item.needs_enrichment())
            .count()
    }
}
