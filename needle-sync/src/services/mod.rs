//! Upstream coordination services
//!
//! - `upstream`: shared HTTP glue, error taxonomy and retry
//! - `rate_limiter`: store-coordinated per-service request spacing
//! - `response_cache`: per-task TTL cache with negative results
//! - `providers`: one client and normalizer per third-party API
//! - `lookups`: cached dashboard lookups
//! - `orchestrator`: collection sync and enrichment pipeline

pub mod lookups;
pub mod orchestrator;
pub mod providers;
pub mod rate_limiter;
pub mod response_cache;
pub mod upstream;

pub use lookups::LookupService;
pub use orchestrator::{
    CollectionSync, EnrichOutcome, EnrichmentRunner, PipelineAction, PipelineError, SyncOutcome,
};
pub use rate_limiter::{RateLimitWindows, RateLimiter};
pub use response_cache::{CacheLookup, CacheTask, ResponseCache};
pub use upstream::{Lookup, Service, UpstreamClient, UpstreamError};
