//! Error types for needle-sync setup and the CLI boundary
//!
//! Each layer has its own error ([`StoreError`], [`UpstreamError`],
//! [`PipelineError`]); this type wraps them for callers that wire the layers
//! together.

use crate::services::orchestrator::PipelineError;
use crate::services::upstream::UpstreamError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// needle-common error (configuration, IO, database setup)
    #[error("Common error: {0}")]
    Common(#[from] needle_common::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// HTTP client could not be built
    #[error("HTTP client setup failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub type Result<T> = std::result::Result<T, Error>;
