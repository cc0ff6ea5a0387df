//! Enrichment state: per-item status, the derived need, and run progress

use serde::{Deserialize, Serialize};

/// Per-item enrichment state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    /// Never attempted
    #[default]
    Pending,
    /// Lookup succeeded, enrichment data attached
    Enriched,
    /// Lookup answered "no such master"
    NotFound,
    /// Lookup failed during a run; eligible again in a later run
    Failed,
}

impl EnrichmentStatus {
    /// `Enriched` and `NotFound` are definitive answers
    pub fn is_resolved(&self) -> bool {
        matches!(self, EnrichmentStatus::Enriched | EnrichmentStatus::NotFound)
    }
}

/// Secondary metadata attached to a collection item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterEnrichment {
    pub master_id: u64,
    pub original_year: Option<i32>,
    pub genres: Vec<String>,
    pub styles: Vec<String>,
    pub track_count: usize,
    pub main_release_id: Option<u64>,
    pub cover_image: Option<String>,
}

/// How much of a snapshot still needs enrichment
///
/// Derived from a snapshot on demand; never stored on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentNeed {
    pub total_items: usize,
    pub already_enriched: usize,
    pub no_external_id: usize,
    pub needs_enrichment: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Complete,
}

/// Persisted state of an enrichment run
///
/// `cursor` indexes the snapshot's item list; items before it have been
/// attempted in this run. The run belongs to the snapshot identified by
/// `snapshot_synced_at_ms` and is discarded if that snapshot is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentProgress {
    pub user_id: String,
    pub snapshot_synced_at_ms: i64,
    pub processed_count: usize,
    pub remaining_count: usize,
    pub error_count: usize,
    pub cursor: usize,
    pub status: ProgressStatus,
    pub started_at_ms: i64,
    pub updated_at_ms: i64,
}

impl EnrichmentProgress {
    /// Fresh run for a snapshot with `need` outstanding
    pub fn start(user_id: &str, snapshot_synced_at_ms: i64, need: &EnrichmentNeed, now_ms: i64) -> Self {
        let status = if need.needs_enrichment == 0 {
            ProgressStatus::Complete
        } else {
            ProgressStatus::InProgress
        };
        Self {
            user_id: user_id.to_string(),
            snapshot_synced_at_ms,
            processed_count: 0,
            remaining_count: need.needs_enrichment,
            error_count: 0,
            cursor: 0,
            status,
            started_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ProgressStatus::Complete
    }

    pub fn belongs_to(&self, snapshot_synced_at_ms: i64) -> bool {
        self.snapshot_synced_at_ms == snapshot_synced_at_ms
    }
}
