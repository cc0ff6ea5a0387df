//! Scrobble (listening history) API client
//!
//! This upstream reports some failures inside a 200 body as
//! `{"error": <code>, "message": ...}`, so the normalizers map those codes
//! into the shared taxonomy themselves. Numbers arrive as strings.

use crate::models::{Scrobble, TopArtist};
use crate::services::upstream::{Lookup, Service, TransientKind, UpstreamClient, UpstreamError};
use serde::Deserialize;

const ERROR_INVALID_PARAMETERS: u32 = 6;
const ERROR_AUTH_FAILED: u32 = 4;
const ERROR_INVALID_API_KEY: u32 = 10;
const ERROR_OPERATION_FAILED: u32 = 8;
const ERROR_SERVICE_OFFLINE: u32 = 11;
const ERROR_TEMPORARILY_UNAVAILABLE: u32 = 16;
const ERROR_RATE_LIMIT_EXCEEDED: u32 = 29;

#[derive(Debug, Deserialize)]
pub struct RecentTracksResponse {
    pub recenttracks: Option<RecentTracks>,
    pub error: Option<u32>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecentTracks {
    #[serde(default)]
    pub track: Vec<RecentTrack>,
}

#[derive(Debug, Deserialize)]
pub struct RecentTrack {
    pub name: String,
    pub artist: TextField,
    pub album: Option<TextField>,
    pub date: Option<UtsDate>,
    #[serde(rename = "@attr")]
    pub attr: Option<TrackAttr>,
}

#[derive(Debug, Deserialize)]
pub struct TextField {
    #[serde(rename = "#text", default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct UtsDate {
    pub uts: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackAttr {
    pub nowplaying: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopArtistsResponse {
    pub topartists: Option<TopArtists>,
    pub error: Option<u32>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TopArtists {
    #[serde(default)]
    pub artist: Vec<TopArtistEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TopArtistEntry {
    pub name: String,
    pub playcount: String,
}

/// Map an in-body error code; `None` when the body carries no error
fn body_error(error: Option<u32>, message: Option<String>) -> Option<Result<(), UpstreamError>> {
    let code = error?;
    let message = message.unwrap_or_else(|| format!("error {}", code));
    Some(match code {
        // Unknown user
        ERROR_INVALID_PARAMETERS => Ok(()),
        ERROR_RATE_LIMIT_EXCEEDED => Err(UpstreamError::transient(
            Service::Scrobble,
            TransientKind::RateLimited { retry_after: None },
            message,
        )),
        ERROR_OPERATION_FAILED | ERROR_SERVICE_OFFLINE | ERROR_TEMPORARILY_UNAVAILABLE => Err(
            UpstreamError::transient(Service::Scrobble, TransientKind::Server(503), message),
        ),
        ERROR_AUTH_FAILED | ERROR_INVALID_API_KEY => {
            Err(UpstreamError::permanent(Service::Scrobble, Some(401), message))
        }
        _ => Err(UpstreamError::permanent(Service::Scrobble, None, message)),
    })
}

pub fn normalize_recent_tracks(
    response: RecentTracksResponse,
) -> Result<Lookup<Vec<Scrobble>>, UpstreamError> {
    if let Some(outcome) = body_error(response.error, response.message) {
        outcome?;
        return Ok(Lookup::NotFound);
    }

    let tracks = response
        .recenttracks
        .ok_or_else(|| UpstreamError::malformed(Service::Scrobble, "missing recenttracks"))?;

    let scrobbles = tracks
        .track
        .into_iter()
        .map(|t| {
            let now_playing = t
                .attr
                .and_then(|a| a.nowplaying)
                .map_or(false, |v| v == "true");
            Scrobble {
                artist: t.artist.text,
                track: t.name,
                album: t.album.map(|a| a.text).filter(|a| !a.is_empty()),
                played_at_ms: t
                    .date
                    .and_then(|d| d.uts.parse::<i64>().ok())
                    .map(|secs| secs * 1000),
                now_playing,
            }
        })
        .collect();

    Ok(Lookup::Found(scrobbles))
}

pub fn normalize_top_artists(
    response: TopArtistsResponse,
) -> Result<Lookup<Vec<TopArtist>>, UpstreamError> {
    if let Some(outcome) = body_error(response.error, response.message) {
        outcome?;
        return Ok(Lookup::NotFound);
    }

    let top = response
        .topartists
        .ok_or_else(|| UpstreamError::malformed(Service::Scrobble, "missing topartists"))?;

    let artists = top
        .artist
        .into_iter()
        .enumerate()
        .map(|(idx, a)| TopArtist {
            name: a.name,
            play_count: a.playcount.parse().unwrap_or(0),
            rank: idx + 1,
        })
        .collect();

    Ok(Lookup::Found(artists))
}

pub struct ScrobbleClient {
    upstream: UpstreamClient,
    base_url: String,
    api_key: String,
}

impl ScrobbleClient {
    pub fn new(upstream: UpstreamClient, base_url: String, api_key: Option<String>) -> Self {
        Self {
            upstream,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.unwrap_or_default(),
        }
    }

    pub async fn recent_tracks(
        &self,
        username: &str,
        limit: u32,
    ) -> Result<Lookup<Vec<Scrobble>>, UpstreamError> {
        let query = [
            ("method", "user.getrecenttracks".to_string()),
            ("user", username.to_string()),
            ("api_key", self.api_key.clone()),
            ("format", "json".to_string()),
            ("limit", limit.to_string()),
        ];
        let response: Lookup<RecentTracksResponse> = self
            .upstream
            .execute(|http| http.get(&self.base_url).query(&query))
            .await?;

        match response {
            Lookup::Found(body) => normalize_recent_tracks(body),
            Lookup::NotFound => Ok(Lookup::NotFound),
        }
    }

    pub async fn top_artists(
        &self,
        username: &str,
        period: &str,
    ) -> Result<Lookup<Vec<TopArtist>>, UpstreamError> {
        let query = [
            ("method", "user.gettopartists".to_string()),
            ("user", username.to_string()),
            ("period", period.to_string()),
            ("api_key", self.api_key.clone()),
            ("format", "json".to_string()),
        ];
        let response: Lookup<TopArtistsResponse> = self
            .upstream
            .execute(|http| http.get(&self.base_url).query(&query))
            .await?;

        match response {
            Lookup::Found(body) => normalize_top_artists(body),
            Lookup::NotFound => Ok(Lookup::NotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_body_error_codes() {
        let unknown_user: RecentTracksResponse =
            serde_json::from_str(r#"{"error": 6, "message": "User not found"}"#).unwrap();
        assert_eq!(normalize_recent_tracks(unknown_user).unwrap(), Lookup::NotFound);

        let throttled: RecentTracksResponse =
            serde_json::from_str(r#"{"error": 29, "message": "Rate Limit Exceeded"}"#).unwrap();
        let err = normalize_recent_tracks(throttled).unwrap_err();
        assert!(err.is_transient());

        let bad_key: TopArtistsResponse =
            serde_json::from_str(r#"{"error": 10, "message": "Invalid API key"}"#).unwrap();
        assert!(normalize_top_artists(bad_key).unwrap_err().is_systemic());
    }

    #[test]
    fn test_missing_payload_is_malformed() {
        let empty: TopArtistsResponse = serde_json::from_str("{}").unwrap();
        let err = normalize_top_artists(empty).unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("missing topartists"));
    }
}
