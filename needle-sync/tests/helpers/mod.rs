//! Test Helper Utilities
//!
//! Shared utilities for testing needle-sync

#![allow(dead_code)]

pub mod fake_source;

pub use fake_source::{collection_items, FakeCollectionSource};

use needle_sync::clock::ManualClock;
use needle_sync::config::Settings;
use needle_sync::services::rate_limiter::RateLimitWindows;
use needle_sync::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

/// Simulated start time used across tests (2024-01-01T00:00:00Z)
pub const START_MS: i64 = 1_704_067_200_000;

/// Manual clock plus an in-memory store driven by it
pub fn memory_env() -> (Arc<ManualClock>, Arc<MemoryStore>) {
    let clock = Arc::new(ManualClock::new(START_MS));
    let store = Arc::new(MemoryStore::new(clock.clone()));
    (clock, store)
}

/// Default settings with every provider pointed at `base_url`
///
/// Rate limiting is off and retries are fast unless a test opts in.
pub fn settings_for(base_url: &str) -> Settings {
    let mut toml = needle_common::config::TomlConfig::default();
    for service in ["collection", "catalog", "scrobble", "links", "llm"] {
        toml.providers.insert(
            service.to_string(),
            needle_common::config::ProviderSection {
                api_key: Some(format!("{}-key", service)),
                base_url: Some(base_url.to_string()),
                model: None,
            },
        );
    }
    toml.http.interactive_timeout_secs = Some(2);
    toml.http.slow_timeout_secs = Some(2);

    let mut settings = Settings::from_toml(&toml).expect("valid test settings");
    settings.rate_limits = RateLimitWindows::none();
    settings.retry.backoff_base = Duration::from_millis(500);
    settings
}

/// Install a test subscriber once; output only shows with `--nocapture`
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
