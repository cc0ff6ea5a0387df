//! Store-coordinated rate limiter
//!
//! Independent, concurrently running invocations share one "last request"
//! timestamp per upstream service through the key-value store. Before a
//! request the caller reads the record, sleeps off any remaining part of the
//! window, then stamps the record with the time it proceeded.
//!
//! The read-then-write is not atomic. Two callers that read the same stale
//! record will both proceed after the same short wait, so this is a
//! best-effort spacing guarantee, not a mutex. Upstream throttling responses
//! that slip through are handled as transient failures by the caller.

use crate::clock::Clock;
use crate::models::RateLimitRecord;
use crate::services::upstream::Service;
use crate::store::{get_json, keys, put_json, KvStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Minimum interval between requests, per service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitWindows {
    windows: HashMap<Service, Duration>,
}

impl RateLimitWindows {
    /// No gating for any service
    pub fn none() -> Self {
        Self {
            windows: HashMap::new(),
        }
    }

    pub fn with(mut self, service: Service, window: Duration) -> Self {
        self.windows.insert(service, window);
        self
    }

    pub fn set(&mut self, service: Service, window: Duration) {
        self.windows.insert(service, window);
    }

    /// Zero when the service is not gated
    pub fn get(&self, service: Service) -> Duration {
        self.windows.get(&service).copied().unwrap_or(Duration::ZERO)
    }
}

impl Default for RateLimitWindows {
    fn default() -> Self {
        Self::none()
            .with(Service::Collection, Duration::from_millis(1100))
            .with(Service::Catalog, Duration::from_millis(1100))
            .with(Service::Scrobble, Duration::from_millis(250))
            .with(Service::Links, Duration::from_millis(1100))
    }
}

pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    windows: RateLimitWindows,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, windows: RateLimitWindows) -> Self {
        Self {
            store,
            clock,
            windows,
        }
    }

    pub fn window(&self, service: Service) -> Duration {
        self.windows.get(service)
    }

    /// Wait until `service` may be called again, then claim the slot
    ///
    /// Returns how long the caller was held. Store failures degrade to
    /// pass-through: a broken store never blocks an upstream call.
    pub async fn acquire(&self, service: Service) -> Duration {
        let window = self.window(service);
        if window.is_zero() {
            return Duration::ZERO;
        }

        let key = keys::rate_limit(service);
        let now = self.clock.now_ms();

        let waited = match get_json::<RateLimitRecord>(self.store.as_ref(), &key).await {
            Ok(Some(record)) => {
                let deficit = remaining_window(window, now - record.last_request_time_ms);
                if !deficit.is_zero() {
                    debug!(
                        service = %service,
                        wait_ms = deficit.as_millis() as u64,
                        "Rate limiting: waiting before upstream request"
                    );
                    self.clock.sleep(deficit).await;
                }
                deficit
            }
            Ok(None) => Duration::ZERO,
            Err(e) => {
                warn!(service = %service, error = %e, "Rate limit record unreadable, proceeding ungated");
                Duration::ZERO
            }
        };

        let record = RateLimitRecord {
            service: service.as_str().to_string(),
            last_request_time_ms: self.clock.now_ms(),
        };
        if let Err(e) =
            put_json(self.store.as_ref(), &key, &record, Some(record_ttl(window))).await
        {
            warn!(service = %service, error = %e, "Failed to record rate limit timestamp");
        }

        waited
    }
}

/// Portion of `window` still to wait given the time since the last request
///
/// A negative elapsed time (a peer's clock ahead of ours) waits the full
/// window rather than trusting the skewed value.
fn remaining_window(window: Duration, elapsed_ms: i64) -> Duration {
    let elapsed = Duration::from_millis(elapsed_ms.max(0) as u64);
    window.saturating_sub(elapsed)
}

/// Records only matter for one window; keep them a little longer, in whole seconds
fn record_ttl(window: Duration) -> Duration {
    let secs = (window.as_millis() as u64 + 999) / 1000;
    Duration::from_secs(secs.max(1))
}
