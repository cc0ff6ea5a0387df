//! LLM provider client (OpenAI-compatible chat completions)
//!
//! Used for short artist summaries. Responses are slow, so this client is
//! built with the long timeout.

use crate::models::ArtistSummary;
use crate::services::upstream::{Lookup, Service, UpstreamClient, UpstreamError};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

pub fn normalize_summary(
    artist: &str,
    requested_model: &str,
    response: ChatResponse,
) -> Result<ArtistSummary, UpstreamError> {
    let summary = response
        .choices
        .into_iter()
        .find_map(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| UpstreamError::malformed(Service::Llm, "no completion text"))?;

    Ok(ArtistSummary {
        artist: artist.trim().to_string(),
        summary,
        model: response.model.unwrap_or_else(|| requested_model.to_string()),
    })
}

pub struct LlmClient {
    upstream: UpstreamClient,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl LlmClient {
    pub fn new(upstream: UpstreamClient, base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            upstream,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    pub async fn artist_summary(&self, artist: &str) -> Result<Lookup<ArtistSummary>, UpstreamError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: format!(
                    "In two sentences, describe the music of {}.",
                    artist.trim()
                ),
            }],
            max_tokens: 200,
        };

        let response: Lookup<ChatResponse> = self
            .upstream
            .execute(|http| {
                let request = http.post(&url).json(&body);
                match &self.api_key {
                    Some(key) => request.header(AUTHORIZATION, format!("Bearer {}", key)),
                    None => request,
                }
            })
            .await?;

        match response {
            Lookup::Found(chat) => normalize_summary(artist, &self.model, chat).map(Lookup::Found),
            Lookup::NotFound => Err(UpstreamError::permanent(
                Service::Llm,
                Some(404),
                "completions endpoint not found",
            )),
        }
    }
}
