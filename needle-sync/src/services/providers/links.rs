//! Link-aggregation API client
//!
//! Resolves a streaming URL to the same music on other platforms.

use super::non_empty;
use crate::models::StreamingLinks;
use crate::services::upstream::{Lookup, UpstreamClient, UpstreamError};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinksResponse {
    pub page_url: Option<String>,
    #[serde(default)]
    pub links_by_platform: HashMap<String, PlatformLink>,
}

#[derive(Debug, Deserialize)]
pub struct PlatformLink {
    pub url: String,
}

/// No platform links at all counts as "not found"
pub fn normalize_links(response: LinksResponse) -> Lookup<StreamingLinks> {
    let platforms: BTreeMap<String, String> = response
        .links_by_platform
        .into_iter()
        .filter(|(_, link)| !link.url.trim().is_empty())
        .map(|(platform, link)| (platform, link.url))
        .collect();

    if platforms.is_empty() {
        return Lookup::NotFound;
    }

    Lookup::Found(StreamingLinks {
        page_url: non_empty(response.page_url),
        platforms,
    })
}

pub struct LinksClient {
    upstream: UpstreamClient,
    base_url: String,
}

impl LinksClient {
    pub fn new(upstream: UpstreamClient, base_url: String) -> Self {
        Self {
            upstream,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn links_for(&self, music_url: &str) -> Result<Lookup<StreamingLinks>, UpstreamError> {
        let url = format!("{}/links", self.base_url);
        let query = [("url", music_url.trim())];
        let response: Lookup<LinksResponse> = self
            .upstream
            .execute(|http| http.get(&url).query(&query))
            .await?;

        Ok(match response {
            Lookup::Found(body) => normalize_links(body),
            Lookup::NotFound => Lookup::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_links_are_dropped() {
        let response: LinksResponse = serde_json::from_str(
            r#"{"pageUrl": "", "linksByPlatform": {"tidal": {"url": "  "}}}"#,
        )
        .unwrap();
        assert_eq!(normalize_links(response), Lookup::NotFound);
    }
}
