//! Shared upstream HTTP glue
//!
//! Every third-party API is treated as an opaque, possibly unreliable,
//! rate-limited HTTP collaborator. This module owns what they have in
//! common: the error taxonomy, status classification, timeouts, the rate
//! limiter gate before each attempt, and bounded retry with backoff.

use crate::clock::Clock;
use crate::services::rate_limiter::RateLimiter;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Longest backoff between two attempts
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Upstream services, one rate-limit clock each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    /// Record-collection API
    Collection,
    /// Catalog / metadata API
    Catalog,
    /// Scrobble (listening history) API
    Scrobble,
    /// Link-aggregation API
    Links,
    /// LLM provider
    Llm,
}

impl Service {
    pub const ALL: [Service; 5] = [
        Service::Collection,
        Service::Catalog,
        Service::Scrobble,
        Service::Links,
        Service::Llm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Collection => "collection",
            Service::Catalog => "catalog",
            Service::Scrobble => "scrobble",
            Service::Links => "links",
            Service::Llm => "llm",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .iter()
            .copied()
            .find(|svc| svc.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| format!("unknown service '{}'", s))
    }
}

/// Kind of retryable failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Network,
    Timeout,
    Server(u16),
    RateLimited { retry_after: Option<Duration> },
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::Network => f.write_str("network failure"),
            TransientKind::Timeout => f.write_str("timed out"),
            TransientKind::Server(status) => write!(f, "server error {}", status),
            TransientKind::RateLimited { .. } => f.write_str("rate limited"),
        }
    }
}

/// Upstream failure taxonomy
///
/// A confirmed negative ("no such record") is not an error; see [`Lookup`].
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Network failure, timeout, 5xx or 429: retryable after backoff
    #[error("{service} {kind}: {message}")]
    Transient {
        service: Service,
        kind: TransientKind,
        message: String,
    },

    /// 4xx other than 404/429, auth failure, malformed response: not retried
    #[error("{service} request failed permanently (status {status:?}): {message}")]
    Permanent {
        service: Service,
        status: Option<u16>,
        message: String,
    },
}

impl UpstreamError {
    pub fn transient(service: Service, kind: TransientKind, message: impl Into<String>) -> Self {
        UpstreamError::Transient {
            service,
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(service: Service, status: Option<u16>, message: impl Into<String>) -> Self {
        UpstreamError::Permanent {
            service,
            status,
            message: message.into(),
        }
    }

    /// Response body did not match the provider's expected shape
    pub fn malformed(service: Service, message: impl Into<String>) -> Self {
        Self::permanent(service, None, format!("malformed response: {}", message.into()))
    }

    pub fn service(&self) -> Service {
        match self {
            UpstreamError::Transient { service, .. } | UpstreamError::Permanent { service, .. } => {
                *service
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            UpstreamError::Transient {
                kind: TransientKind::Timeout,
                ..
            }
        )
    }

    /// Failures that will hit every item alike (bad credentials), so a batch
    /// should stop instead of recording one error per item
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            UpstreamError::Permanent {
                status: Some(401) | Some(403),
                ..
            }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::Transient {
                kind: TransientKind::RateLimited { retry_after },
                ..
            } => *retry_after,
            _ => None,
        }
    }
}

/// Outcome of a successful lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    /// The upstream answered and confirmed there is nothing to find
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
        }
    }
}

/// HTTP status classes as the pipeline sees them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    NotFound,
    RateLimited,
    Transient,
    Auth,
    Permanent,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        404 => StatusClass::NotFound,
        429 => StatusClass::RateLimited,
        401 | 403 => StatusClass::Auth,
        500..=599 => StatusClass::Transient,
        _ => StatusClass::Permanent,
    }
}

/// Map a transport-level reqwest error into the taxonomy
pub fn map_reqwest_error(service: Service, err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::transient(service, TransientKind::Timeout, err.to_string())
    } else if err.is_decode() {
        UpstreamError::malformed(service, err.to_string())
    } else {
        UpstreamError::transient(service, TransientKind::Network, err.to_string())
    }
}

/// Parse a `Retry-After` header given in seconds
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// Wait before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Rate-limited, retrying HTTP client for one service
#[derive(Clone)]
pub struct UpstreamClient {
    service: Service,
    http: Client,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(
        service: Service,
        http: Client,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            http,
            limiter,
            clock,
            timeout,
            retry,
        }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    /// Send a request and decode a JSON body
    ///
    /// `build` is called once per attempt. Before each attempt the shared rate
    /// limiter is acquired. 404 becomes [`Lookup::NotFound`]; transient
    /// failures are retried up to the policy's attempt count, waiting the
    /// `Retry-After` value for 429 or the exponential backoff otherwise.
    pub async fn execute<T, F>(&self, build: F) -> Result<Lookup<T>, UpstreamError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.limiter.acquire(self.service).await;

            let result = match build(&self.http).timeout(self.timeout).send().await {
                Ok(response) => self.decode(response).await,
                Err(e) => Err(map_reqwest_error(self.service, e)),
            };

            match result {
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let wait = err
                        .retry_after()
                        .unwrap_or_else(|| self.retry.backoff(attempt))
                        .min(MAX_BACKOFF);
                    warn!(
                        service = %self.service,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Transient upstream failure, backing off"
                    );
                    self.clock.sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<Lookup<T>, UpstreamError> {
        let status = response.status().as_u16();
        debug!(service = %self.service, status, "Upstream response");

        match classify_status(status) {
            StatusClass::Success => {
                let body = response
                    .text()
                    .await
                    .map_err(|e| map_reqwest_error(self.service, e))?;
                serde_json::from_str(&body)
                    .map(Lookup::Found)
                    .map_err(|e| UpstreamError::malformed(self.service, e.to_string()))
            }
            StatusClass::NotFound => Ok(Lookup::NotFound),
            StatusClass::RateLimited => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                Err(UpstreamError::transient(
                    self.service,
                    TransientKind::RateLimited { retry_after },
                    "HTTP 429",
                ))
            }
            StatusClass::Transient => Err(UpstreamError::transient(
                self.service,
                TransientKind::Server(status),
                format!("HTTP {}", status),
            )),
            StatusClass::Auth | StatusClass::Permanent => {
                let text = response.text().await.unwrap_or_default();
                Err(UpstreamError::permanent(
                    self.service,
                    Some(status),
                    truncate(&text, 200),
                ))
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
