//! Cached dashboard lookups
//!
//! Each lookup goes cache first, then the provider. Cache trouble never
//! blocks the fetch (see [`ResponseCache`]), and upstream errors are never
//! cached, so the next call tries again.

use crate::models::{ArtistSummary, CatalogArtist, Scrobble, StreamingLinks, TopArtist};
use crate::services::providers::{CatalogClient, LinksClient, LlmClient, ScrobbleClient};
use crate::services::response_cache::{CacheTask, ResponseCache};
use crate::services::upstream::{Lookup, UpstreamError};
use std::sync::Arc;

pub struct LookupService {
    cache: Arc<ResponseCache>,
    catalog: Arc<CatalogClient>,
    scrobble: Arc<ScrobbleClient>,
    links: Arc<LinksClient>,
    llm: Arc<LlmClient>,
}

impl LookupService {
    pub fn new(
        cache: Arc<ResponseCache>,
        catalog: Arc<CatalogClient>,
        scrobble: Arc<ScrobbleClient>,
        links: Arc<LinksClient>,
        llm: Arc<LlmClient>,
    ) -> Self {
        Self {
            cache,
            catalog,
            scrobble,
            links,
            llm,
        }
    }

    pub async fn artist_summary(&self, artist: &str) -> Result<Lookup<ArtistSummary>, UpstreamError> {
        self.cache
            .get_or_fetch(CacheTask::ArtistSummary, &[artist], || {
                self.llm.artist_summary(artist)
            })
            .await
    }

    /// Unknown artists are negatively cached for the task's full TTL
    pub async fn catalog_artist(&self, name: &str) -> Result<Lookup<CatalogArtist>, UpstreamError> {
        self.cache
            .get_or_fetch(CacheTask::CatalogArtist, &[name], || {
                self.catalog.search_artist(name)
            })
            .await
    }

    pub async fn streaming_links(&self, music_url: &str) -> Result<Lookup<StreamingLinks>, UpstreamError> {
        self.cache
            .get_or_fetch(CacheTask::StreamingLinks, &[music_url], || {
                self.links.links_for(music_url)
            })
            .await
    }

    pub async fn top_artists(
        &self,
        username: &str,
        period: &str,
    ) -> Result<Lookup<Vec<TopArtist>>, UpstreamError> {
        self.cache
            .get_or_fetch(CacheTask::TopArtists, &[username, period], || {
                self.scrobble.top_artists(username, period)
            })
            .await
    }

    /// Never cached (the task's TTL is zero)
    pub async fn recent_tracks(
        &self,
        username: &str,
        limit: u32,
    ) -> Result<Lookup<Vec<Scrobble>>, UpstreamError> {
        let limit_param = limit.to_string();
        self.cache
            .get_or_fetch(CacheTask::RecentTracks, &[username, &limit_param], || {
                self.scrobble.recent_tracks(username, limit)
            })
            .await
    }
}
