//! needle-sync library interface
//!
//! Coordinates calls to rate-limited third-party music services: a shared
//! rate limiter and response cache over a key-value store, and a resumable
//! collection sync and enrichment pipeline.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod queue;
pub mod services;
pub mod store;

pub use crate::context::Coordinator;
pub use crate::error::{Error, Result};
