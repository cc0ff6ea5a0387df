//! # Needle Common Library
//!
//! Shared code for the Needle crates:
//! - Error type
//! - TOML configuration loading and data folder resolution
//! - SQLite pool initialization
//! - Time helpers and human-readable wait formatting

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod human_time;
pub mod time;

pub use error::{Error, Result};
