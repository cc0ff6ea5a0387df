//! Dashboard entities produced by the provider normalizers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One listened track from the scrobble service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scrobble {
    pub artist: String,
    pub track: String,
    pub album: Option<String>,
    /// `None` while the track is still playing
    pub played_at_ms: Option<i64>,
    pub now_playing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopArtist {
    pub name: String,
    pub play_count: u64,
    pub rank: usize,
}

/// Catalog match for an artist name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogArtist {
    pub id: String,
    pub name: String,
    pub country: Option<String>,
    pub disambiguation: Option<String>,
    pub begin_year: Option<i32>,
    pub tags: Vec<String>,
}

/// Per-platform links for one piece of music
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingLinks {
    pub page_url: Option<String>,
    /// Platform name to URL
    pub platforms: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtistSummary {
    pub artist: String,
    pub summary: String,
    pub model: String,
}
