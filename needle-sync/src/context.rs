//! Explicit runtime context
//!
//! One [`Coordinator`] per execution context holds everything the pipeline
//! and lookups share: the store, the clock, settings, the rate limiter, the
//! response cache and the HTTP client. Components are built from it on
//! demand instead of living in globals.

use crate::clock::Clock;
use crate::config::Settings;
use crate::error::Result;
use crate::queue::TaskQueue;
use crate::services::lookups::LookupService;
use crate::services::orchestrator::{CollectionSync, EnrichmentRunner};
use crate::services::providers::{
    CatalogClient, CollectionClient, CollectionSource, LinksClient, LlmClient, ScrobbleClient,
};
use crate::services::rate_limiter::RateLimiter;
use crate::services::response_cache::ResponseCache;
use crate::services::upstream::{Service, UpstreamClient};
use crate::store::KvStore;
use std::sync::Arc;

pub struct Coordinator {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    settings: Settings,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    http: reqwest::Client,
    queue: Option<Arc<dyn TaskQueue>>,
    collection_source: Option<Arc<dyn CollectionSource>>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, settings: Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()?;
        let limiter = Arc::new(RateLimiter::new(
            store.clone(),
            clock.clone(),
            settings.rate_limits.clone(),
        ));
        let cache = Arc::new(ResponseCache::new(store.clone()));

        Ok(Self {
            store,
            clock,
            settings,
            limiter,
            cache,
            http,
            queue: None,
            collection_source: None,
        })
    }

    /// Enrichment requests are handed to this queue instead of running inline
    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Replace the HTTP collection client (tests, alternative sources)
    pub fn with_collection_source(mut self, source: Arc<dyn CollectionSource>) -> Self {
        self.collection_source = Some(source);
        self
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Rate-limited, retrying client for one service
    pub fn upstream(&self, service: Service) -> UpstreamClient {
        UpstreamClient::new(
            service,
            self.http.clone(),
            self.limiter.clone(),
            self.clock.clone(),
            self.settings.timeout_for(service),
            self.settings.retry,
        )
    }

    pub fn collection_source(&self) -> Arc<dyn CollectionSource> {
        if let Some(source) = &self.collection_source {
            return source.clone();
        }
        let provider = self.settings.provider(Service::Collection);
        Arc::new(CollectionClient::new(
            self.upstream(Service::Collection),
            provider.base_url.clone(),
            provider.api_key.clone(),
            self.settings.page_size,
        ))
    }

    pub fn collection_sync(&self) -> CollectionSync {
        CollectionSync::new(
            self.store.clone(),
            self.clock.clone(),
            self.collection_source(),
            self.settings.sync,
        )
    }

    /// Runner for request handlers: hands off to the queue when one is set
    pub fn enrichment_runner(&self) -> EnrichmentRunner {
        let runner = self.background_runner();
        match &self.queue {
            Some(queue) => runner.with_queue(queue.clone()),
            None => runner,
        }
    }

    /// Runner for the queue consumer: always runs inline
    pub fn background_runner(&self) -> EnrichmentRunner {
        EnrichmentRunner::new(
            self.store.clone(),
            self.clock.clone(),
            self.collection_source(),
            self.cache.clone(),
            self.settings.enrichment,
        )
    }

    pub fn lookups(&self) -> LookupService {
        let catalog = self.settings.provider(Service::Catalog);
        let scrobble = self.settings.provider(Service::Scrobble);
        let links = self.settings.provider(Service::Links);
        let llm = self.settings.provider(Service::Llm);

        LookupService::new(
            self.cache.clone(),
            Arc::new(CatalogClient::new(
                self.upstream(Service::Catalog),
                catalog.base_url.clone(),
            )),
            Arc::new(ScrobbleClient::new(
                self.upstream(Service::Scrobble),
                scrobble.base_url.clone(),
                scrobble.api_key.clone(),
            )),
            Arc::new(LinksClient::new(
                self.upstream(Service::Links),
                links.base_url.clone(),
            )),
            Arc::new(LlmClient::new(
                self.upstream(Service::Llm),
                llm.base_url.clone(),
                llm.api_key.clone(),
                llm.model.clone().unwrap_or_default(),
            )),
        )
    }
}
