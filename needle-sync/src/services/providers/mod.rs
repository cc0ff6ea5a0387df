//! Upstream providers
//!
//! Each provider module holds the serde shape of its upstream responses, a
//! pure normalization function into the shared entity types, and a thin
//! client built on [`UpstreamClient`](crate::services::upstream::UpstreamClient).

pub mod catalog;
pub mod collection;
pub mod links;
pub mod llm;
pub mod scrobble;

pub use catalog::CatalogClient;
pub use collection::{CollectionClient, CollectionSource};
pub use links::LinksClient;
pub use llm::LlmClient;
pub use scrobble::ScrobbleClient;

/// Empty and whitespace-only strings from upstream JSON become `None`
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
