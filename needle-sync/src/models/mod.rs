//! Entity types shared by the providers and the pipeline

pub mod collection;
pub mod dashboard;
pub mod enrichment;
pub mod records;

pub use collection::{CollectionItem, CollectionPage, CollectionSnapshot, CollectionStats};
pub use dashboard::{ArtistSummary, CatalogArtist, Scrobble, StreamingLinks, TopArtist};
pub use enrichment::{
    EnrichmentNeed, EnrichmentProgress, EnrichmentStatus, MasterEnrichment, ProgressStatus,
};
pub use records::{RateLimitRecord, RunLockRecord, SyncCooldownRecord};
