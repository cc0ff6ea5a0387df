//! Catalog (metadata) API client
//!
//! Artist search by name. Search always answers 200; "no match" is an empty
//! or low-scoring result list, which normalizes to [`Lookup::NotFound`] so it
//! can be negatively cached.

use super::non_empty;
use crate::models::CatalogArtist;
use crate::services::upstream::{Lookup, UpstreamClient, UpstreamError};
use serde::Deserialize;

/// Minimum search score (0-100) accepted as a match
const MIN_MATCH_SCORE: u32 = 90;

#[derive(Debug, Deserialize)]
pub struct ArtistSearchResponse {
    #[serde(default)]
    pub artists: Vec<ArtistResult>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistResult {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub score: u32,
    pub country: Option<String>,
    pub disambiguation: Option<String>,
    #[serde(rename = "life-span")]
    pub life_span: Option<LifeSpan>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
pub struct LifeSpan {
    pub begin: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub count: i64,
}

/// Pick the best match for `query` from a search response
///
/// An exact (case-insensitive) name match above the score threshold wins;
/// otherwise the highest-scoring result above the threshold.
pub fn normalize_artist_search(query: &str, response: ArtistSearchResponse) -> Lookup<CatalogArtist> {
    let wanted = query.trim().to_lowercase();
    let mut candidates: Vec<ArtistResult> = response
        .artists
        .into_iter()
        .filter(|a| a.score >= MIN_MATCH_SCORE)
        .collect();

    let best = match candidates
        .iter()
        .position(|a| a.name.trim().to_lowercase() == wanted)
    {
        Some(idx) => Some(candidates.swap_remove(idx)),
        None => candidates.into_iter().max_by_key(|a| a.score),
    };

    match best {
        Some(artist) => Lookup::Found(to_catalog_artist(artist)),
        None => Lookup::NotFound,
    }
}

fn to_catalog_artist(artist: ArtistResult) -> CatalogArtist {
    let mut tags = artist.tags;
    tags.sort_by(|a, b| b.count.cmp(&a.count));

    CatalogArtist {
        id: artist.id,
        name: artist.name,
        country: non_empty(artist.country),
        disambiguation: non_empty(artist.disambiguation),
        begin_year: artist
            .life_span
            .and_then(|ls| ls.begin)
            .and_then(|begin| begin.get(..4).and_then(|y| y.parse().ok())),
        tags: tags.into_iter().take(5).map(|t| t.name).collect(),
    }
}

pub struct CatalogClient {
    upstream: UpstreamClient,
    base_url: String,
}

impl CatalogClient {
    pub fn new(upstream: UpstreamClient, base_url: String) -> Self {
        Self {
            upstream,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn search_artist(&self, name: &str) -> Result<Lookup<CatalogArtist>, UpstreamError> {
        let url = format!("{}/artist", self.base_url);
        let query = [
            ("query", format!("artist:\"{}\"", name.trim().replace('"', ""))),
            ("fmt", "json".to_string()),
            ("limit", "5".to_string()),
        ];

        let response: Lookup<ArtistSearchResponse> = self
            .upstream
            .execute(|http| http.get(&url).query(&query))
            .await?;

        Ok(match response {
            Lookup::Found(body) => normalize_artist_search(name, body),
            Lookup::NotFound => Lookup::NotFound,
        })
    }
}
