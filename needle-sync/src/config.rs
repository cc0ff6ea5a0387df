//! Runtime settings for needle-sync
//!
//! Built from the shared TOML config. Every value has a default; the file
//! only overrides. API keys resolve ENV → TOML, with a warning when both are
//! set.

use crate::services::orchestrator::{EnrichmentSettings, SyncSettings};
use crate::services::rate_limiter::RateLimitWindows;
use crate::services::upstream::{RetryPolicy, Service};
use needle_common::config::{ProviderSection, TomlConfig};
use needle_common::{Error, Result};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_INTERACTIVE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SLOW_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Endpoint and credentials for one upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub sync: SyncSettings,
    pub enrichment: EnrichmentSettings,
    /// Items per collection page request
    pub page_size: u32,
    pub rate_limits: RateLimitWindows,
    pub interactive_timeout: Duration,
    /// For providers known to be slow (LLM)
    pub slow_timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
    providers: BTreeMap<Service, ProviderSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        let providers = Service::ALL
            .iter()
            .map(|&service| {
                (
                    service,
                    ProviderSettings {
                        base_url: default_base_url(service).to_string(),
                        api_key: None,
                        model: (service == Service::Llm).then(|| DEFAULT_LLM_MODEL.to_string()),
                    },
                )
            })
            .collect();

        Self {
            sync: SyncSettings::default(),
            enrichment: EnrichmentSettings::default(),
            page_size: DEFAULT_PAGE_SIZE,
            rate_limits: RateLimitWindows::default(),
            interactive_timeout: DEFAULT_INTERACTIVE_TIMEOUT,
            slow_timeout: DEFAULT_SLOW_TIMEOUT,
            retry: RetryPolicy::default(),
            user_agent: format!("needle/{}", env!("CARGO_PKG_VERSION")),
            providers,
        }
    }
}

impl Settings {
    /// Apply TOML overrides and resolve API keys from the environment
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        let mut settings = Settings::default();

        if let Some(hours) = config.sync.cooldown_hours {
            let secs = hours.checked_mul(60 * 60).ok_or_else(|| {
                Error::Config(format!("sync.cooldown_hours is out of range: {}", hours))
            })?;
            settings.sync.cooldown = Duration::from_secs(secs);
        }
        if let Some(page_size) = config.sync.page_size {
            settings.page_size = page_size;
        }

        let enrichment = &config.enrichment;
        if let Some(batch_size) = enrichment.batch_size {
            settings.enrichment.batch_size = batch_size;
        }
        if let Some(concurrency) = enrichment.concurrency {
            settings.enrichment.concurrency = concurrency;
        }
        if let Some(max_batches) = enrichment.max_batches_per_drain {
            settings.enrichment.max_batches_per_drain = max_batches;
        }
        if let Some(secs) = enrichment.lock_ttl_secs {
            settings.enrichment.lock_ttl = Duration::from_secs(secs);
        }

        let http = &config.http;
        if let Some(secs) = http.interactive_timeout_secs {
            settings.interactive_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = http.slow_timeout_secs {
            settings.slow_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = http.max_attempts {
            settings.retry.max_attempts = attempts;
        }
        if let Some(ms) = http.backoff_base_ms {
            settings.retry.backoff_base = Duration::from_millis(ms);
        }
        if let Some(agent) = http.user_agent.as_ref().filter(|a| !a.trim().is_empty()) {
            settings.user_agent = agent.clone();
        }

        for (name, window_ms) in &config.rate_limits {
            let service = parse_service(name, "rate_limits")?;
            settings
                .rate_limits
                .set(service, Duration::from_millis(*window_ms));
        }

        for (name, section) in &config.providers {
            let service = parse_service(name, "providers")?;
            apply_provider_section(settings.provider_mut(service), section);
        }

        for service in Service::ALL {
            let toml_key = config
                .providers
                .get(service.as_str())
                .and_then(|p| p.api_key.as_deref());
            settings.provider_mut(service).api_key = resolve_api_key(service, toml_key);
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn provider(&self, service: Service) -> &ProviderSettings {
        // Populated for every service by Default
        &self.providers[&service]
    }

    fn provider_mut(&mut self, service: Service) -> &mut ProviderSettings {
        self.providers
            .entry(service)
            .or_insert_with(|| ProviderSettings {
                base_url: default_base_url(service).to_string(),
                api_key: None,
                model: None,
            })
    }

    /// Per-call timeout for a service
    pub fn timeout_for(&self, service: Service) -> Duration {
        match service {
            Service::Llm => self.slow_timeout,
            _ => self.interactive_timeout,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.enrichment.batch_size == 0 {
            return Err(Error::Config("enrichment.batch_size must be at least 1".to_string()));
        }
        if self.enrichment.concurrency == 0 {
            return Err(Error::Config("enrichment.concurrency must be at least 1".to_string()));
        }
        if self.page_size == 0 {
            return Err(Error::Config("sync.page_size must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("http.max_attempts must be at least 1".to_string()));
        }
        if self.interactive_timeout.is_zero() || self.slow_timeout.is_zero() {
            return Err(Error::Config("http timeouts must be non-zero".to_string()));
        }
        for (service, provider) in &self.providers {
            if !provider.base_url.starts_with("http://") && !provider.base_url.starts_with("https://") {
                return Err(Error::Config(format!(
                    "providers.{}.base_url must be an http(s) URL, got '{}'",
                    service, provider.base_url
                )));
            }
        }
        Ok(())
    }
}

fn parse_service(name: &str, section: &str) -> Result<Service> {
    name.parse()
        .map_err(|e: String| Error::Config(format!("[{}] {}", section, e)))
}

fn apply_provider_section(provider: &mut ProviderSettings, section: &ProviderSection) {
    if let Some(url) = section.base_url.as_ref().filter(|u| !u.trim().is_empty()) {
        provider.base_url = url.trim().to_string();
    }
    if let Some(model) = section.model.as_ref().filter(|m| !m.trim().is_empty()) {
        provider.model = Some(model.trim().to_string());
    }
}

fn default_base_url(service: Service) -> &'static str {
    match service {
        Service::Collection => "https://api.discogs.com",
        Service::Catalog => "https://musicbrainz.org/ws/2",
        Service::Scrobble => "https://ws.audioscrobbler.com/2.0/",
        Service::Links => "https://api.song.link/v1-alpha.1",
        Service::Llm => "https://api.openai.com/v1",
    }
}

/// Environment variable holding a service's API key
pub fn api_key_env_var(service: Service) -> String {
    format!("NEEDLE_{}_API_KEY", service.as_str().to_ascii_uppercase())
}

/// Resolve an API key from 2-tier configuration
///
/// **Priority:** ENV → TOML. Whitespace-only values are ignored.
pub fn resolve_api_key(service: Service, toml_key: Option<&str>) -> Option<String> {
    let env_key = std::env::var(api_key_env_var(service))
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = toml_key.filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            service = %service,
            "API key found in both environment and TOML. Using environment (highest priority)."
        );
    }

    if let Some(key) = env_key {
        info!(service = %service, "API key loaded from environment variable");
        return Some(key.trim().to_string());
    }

    if let Some(key) = toml_key {
        info!(service = %service, "API key loaded from TOML config");
        return Some(key.trim().to_string());
    }

    None
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}
