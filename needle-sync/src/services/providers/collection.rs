//! Record-collection API client
//!
//! Lists a user's collection page by page and looks up master releases for
//! enrichment. Upstream artist names carry a numeric disambiguation suffix
//! (`Nirvana (2)`) which is stripped during normalization, and `0` is used
//! for "no master", which normalizes to `None`.

use super::non_empty;
use crate::models::{CollectionItem, CollectionPage, EnrichmentStatus, MasterEnrichment};
use crate::services::upstream::{Lookup, Service, UpstreamClient, UpstreamError};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::debug;

/// Source of collection data, the seam the sync pipeline depends on
#[async_trait]
pub trait CollectionSource: Send + Sync {
    /// Fetch one page (1-based) of a user's collection
    async fn fetch_collection_page(
        &self,
        username: &str,
        page: u32,
    ) -> Result<CollectionPage, UpstreamError>;

    /// Look up a master release for enrichment
    async fn fetch_master(&self, master_id: u64) -> Result<Lookup<MasterEnrichment>, UpstreamError>;
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CollectionPageResponse {
    pub pagination: Pagination,
    #[serde(default)]
    pub releases: Vec<CollectionRelease>,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub pages: u32,
}

#[derive(Debug, Deserialize)]
pub struct CollectionRelease {
    pub instance_id: u64,
    pub id: u64,
    pub date_added: Option<String>,
    pub basic_information: BasicInformation,
}

#[derive(Debug, Deserialize)]
pub struct BasicInformation {
    #[serde(default)]
    pub master_id: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub artists: Vec<NamedEntity>,
    #[serde(default)]
    pub formats: Vec<NamedEntity>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub styles: Vec<String>,
    pub cover_image: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamedEntity {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct MasterResponse {
    pub id: u64,
    #[serde(default)]
    pub year: Option<i32>,
    pub main_release: Option<u64>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub tracklist: Vec<Track>,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
pub struct Track {
    #[serde(rename = "type_", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Image {
    #[serde(rename = "type")]
    pub kind: String,
    pub uri: String,
}

// ============================================================================
// Normalization
// ============================================================================

pub fn normalize_collection_page(response: CollectionPageResponse) -> CollectionPage {
    let items = response
        .releases
        .into_iter()
        .map(normalize_release)
        .collect();

    CollectionPage {
        page: response.pagination.page,
        pages: response.pagination.pages,
        items,
    }
}

fn normalize_release(release: CollectionRelease) -> CollectionItem {
    let info = release.basic_information;
    let artist = info
        .artists
        .iter()
        .map(|a| strip_disambiguation(&a.name))
        .collect::<Vec<_>>()
        .join(", ");

    CollectionItem {
        instance_id: release.instance_id,
        release_id: release.id,
        master_id: info.master_id.filter(|id| *id != 0),
        artist,
        title: info.title.trim().to_string(),
        year: info.year.filter(|y| *y > 0),
        formats: info.formats.into_iter().map(|f| f.name).collect(),
        genres: info.genres,
        styles: info.styles,
        added_at_ms: release
            .date_added
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp_millis()),
        cover_image: non_empty(info.cover_image),
        enrichment_status: EnrichmentStatus::Pending,
        enrichment: None,
    }
}

pub fn normalize_master(response: MasterResponse) -> MasterEnrichment {
    let cover_image = response
        .images
        .iter()
        .find(|img| img.kind == "primary")
        .or_else(|| response.images.first())
        .map(|img| img.uri.clone());

    // Headings and index entries are not playable tracks
    let track_count = response
        .tracklist
        .iter()
        .filter(|t| t.kind.as_deref().map_or(true, |k| k == "track"))
        .count();

    MasterEnrichment {
        master_id: response.id,
        original_year: response.year.filter(|y| *y > 0),
        genres: response.genres,
        styles: response.styles,
        track_count,
        main_release_id: response.main_release.filter(|id| *id != 0),
        cover_image,
    }
}

/// `Nirvana (2)` -> `Nirvana`
fn strip_disambiguation(name: &str) -> String {
    let trimmed = name.trim();
    if let Some(open) = trimmed.rfind(" (") {
        let suffix = &trimmed[open + 2..];
        if let Some(digits) = suffix.strip_suffix(')') {
            if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return trimmed[..open].to_string();
            }
        }
    }
    trimmed.to_string()
}

// ============================================================================
// Client
// ============================================================================

pub struct CollectionClient {
    upstream: UpstreamClient,
    base_url: String,
    token: Option<String>,
    page_size: u32,
}

impl CollectionClient {
    pub fn new(upstream: UpstreamClient, base_url: String, token: Option<String>, page_size: u32) -> Self {
        Self {
            upstream,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            page_size,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Discogs token={}", token)),
            None => request,
        }
    }
}

#[async_trait]
impl CollectionSource for CollectionClient {
    async fn fetch_collection_page(
        &self,
        username: &str,
        page: u32,
    ) -> Result<CollectionPage, UpstreamError> {
        let url = format!(
            "{}/users/{}/collection/folders/0/releases",
            self.base_url, username
        );
        let query = [
            ("page", page.to_string()),
            ("per_page", self.page_size.to_string()),
        ];
        debug!(username = %username, page, "Fetching collection page");

        let response: Lookup<CollectionPageResponse> = self
            .upstream
            .execute(|http| self.authorize(http.get(&url).query(&query)))
            .await?;

        match response {
            Lookup::Found(body) => Ok(normalize_collection_page(body)),
            // A collection listing has no "confirmed empty" answer: 404 means
            // the user name is wrong, which retrying will not fix
            Lookup::NotFound => Err(UpstreamError::permanent(
                Service::Collection,
                Some(404),
                format!("collection for '{}' not found", username),
            )),
        }
    }

    async fn fetch_master(&self, master_id: u64) -> Result<Lookup<MasterEnrichment>, UpstreamError> {
        let url = format!("{}/masters/{}", self.base_url, master_id);
        let response: Lookup<MasterResponse> = self
            .upstream
            .execute(|http| self.authorize(http.get(&url)))
            .await?;
        Ok(response.map(normalize_master))
    }
}
