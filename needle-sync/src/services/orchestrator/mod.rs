//! Collection sync and enrichment orchestration
//!
//! Sync pulls a user's whole collection into a snapshot. Enrichment then
//! walks the snapshot in bounded batches, persisting a cursor after each one
//! so that any later invocation (inline or from the background queue) picks
//! up where the last one stopped.
//!
//! State progression:
//! - sync: Idle → Syncing → Synced, or Idle → CooldownRejected
//! - enrichment: NotStarted → InProgress → Complete (re-entrant)

mod enrichment;
mod run_lock;
mod sync;

pub use enrichment::{EnrichOutcome, EnrichmentReport, EnrichmentRunner, EnrichmentSettings};
pub use run_lock::RunLock;
pub use sync::{CollectionSync, SyncOutcome, SyncSettings};

use crate::queue::QueueError;
use crate::services::upstream::UpstreamError;
use crate::store::StoreError;
use thiserror::Error;

/// Pipeline failures
///
/// Cooldown rejection and lock contention are outcomes, not errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("No collection snapshot for user {0}")]
    NotSynced(String),

    #[error("Queue submission failed: {0}")]
    Queue(#[from] QueueError),
}

/// Which operation a failure is reported for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineAction {
    Sync,
    Enrich,
}

impl PipelineError {
    /// Generic text for end users; details stay in the logs
    pub fn user_message(&self, action: PipelineAction) -> String {
        match (self, action) {
            (PipelineError::NotSynced(_), _) => {
                "Your collection has not been synced yet. Please sync first".to_string()
            }
            (_, PipelineAction::Sync) => "Sync failed, please retry".to_string(),
            (_, PipelineAction::Enrich) => "Enrichment failed, please retry".to_string(),
        }
    }
}
