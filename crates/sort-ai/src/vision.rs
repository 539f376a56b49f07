//! Photo analysis through an OpenAI-compatible chat completions API.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sort_types::{Photo, PhotoAnalysis, ProviderError, VisionProvider};
use std::collections::HashMap;
use std::fmt;

const SYSTEM_PROMPT: &str = "You organise photo albums. For each photo, write a one-sentence \
description, estimate when it was taken, and list a few short labels. Reply with JSON only: \
{\"id\": string, \"description\": string, \"taken_at\": \"YYYY-MM-DD\" or null, \"labels\": [string]}. \
When several photos are given, reply with a JSON array holding one such object per photo.";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Shape the model is asked to answer with.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    id: Option<String>,
    description: String,
    #[serde(default)]
    taken_at: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
}

/// Vision provider backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiVisionProvider {
    name: String,
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiVisionProvider {
    pub fn new(
        name: impl Into<String>,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Registered as "openai". `None` without `LLM_API_KEY`.
    pub fn from_env() -> Option<Self> {
        let api_url = std::env::var("LLM_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let api_key = std::env::var("LLM_API_KEY").ok()?;
        let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        Some(Self::new("openai", api_url, api_key, model))
    }

    fn photo_content(photo: &Photo) -> Vec<serde_json::Value> {
        let mut text = format!("id: {}\ntitle: {}\nfile: {}", photo.id, photo.title, photo.file_name);
        if let Some(taken_at) = photo.taken_at {
            text.push_str(&format!("\ncurrent date: {}", taken_at.format("%Y-%m-%d")));
        }
        let mut parts = vec![serde_json::json!({ "type": "text", "text": text })];
        if let Some(ref url) = photo.thumb_url {
            parts.push(serde_json::json!({ "type": "image_url", "image_url": { "url": url } }));
        }
        parts
    }

    async fn complete(&self, content: Vec<serde_json::Value>) -> Result<String, ProviderError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: serde_json::Value::String(SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user",
                    content: serde_json::Value::Array(content),
                },
            ],
            max_tokens: Some(2048),
            temperature: Some(0.2),
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Other(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!("status: {}, body: {}", status, body)));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::Other("no choices returned".to_string()))
    }
}

impl fmt::Debug for OpenAiVisionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiVisionProvider")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

#[async_trait]
impl VisionProvider for OpenAiVisionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, photo: &Photo) -> Result<PhotoAnalysis, ProviderError> {
        let reply = self.complete(Self::photo_content(photo)).await?;
        parse_analysis(&photo.id, &reply)
    }

    async fn analyze_batch(&self, photos: &[Photo]) -> Result<Vec<PhotoAnalysis>, ProviderError> {
        if photos.is_empty() {
            return Ok(Vec::new());
        }
        let content: Vec<serde_json::Value> =
            photos.iter().flat_map(Self::photo_content).collect();
        let reply = self.complete(content).await?;
        let ids: Vec<String> = photos.iter().map(|p| p.id.clone()).collect();
        parse_batch_analysis(&ids, &reply)
    }
}

/// Models like to wrap JSON in markdown fences.
fn strip_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_date(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

fn into_analysis(photo_id: &str, raw: RawAnalysis) -> PhotoAnalysis {
    PhotoAnalysis {
        photo_id: photo_id.to_string(),
        description: raw.description.trim().to_string(),
        taken_at: parse_date(raw.taken_at.as_deref()),
        labels: raw.labels,
    }
}

/// Parse a single-photo reply.
pub fn parse_analysis(photo_id: &str, reply: &str) -> Result<PhotoAnalysis, ProviderError> {
    let raw: RawAnalysis =
        serde_json::from_str(strip_fences(reply)).map_err(|e| ProviderError::Parse(e.to_string()))?;
    Ok(into_analysis(photo_id, raw))
}

/// Parse a batch reply, returned in the order of `photo_ids`. Entries are matched by
/// `id` when the model echoes it, otherwise by position.
pub fn parse_batch_analysis(
    photo_ids: &[String],
    reply: &str,
) -> Result<Vec<PhotoAnalysis>, ProviderError> {
    let raws: Vec<RawAnalysis> =
        serde_json::from_str(strip_fences(reply)).map_err(|e| ProviderError::Parse(e.to_string()))?;
    if raws.len() != photo_ids.len() {
        return Err(ProviderError::Parse(format!(
            "expected {} analyses, got {}",
            photo_ids.len(),
            raws.len()
        )));
    }
    let mut by_id: HashMap<String, RawAnalysis> = HashMap::new();
    let mut positional = Vec::new();
    for raw in raws {
        match raw.id.clone() {
            Some(id) if photo_ids.contains(&id) => {
                by_id.insert(id, raw);
            }
            _ => positional.push(raw),
        }
    }
    let mut positional = positional.into_iter();
    photo_ids
        .iter()
        .map(|id| {
            by_id
                .remove(id)
                .or_else(|| positional.next())
                .map(|raw| into_analysis(id, raw))
                .ok_or_else(|| ProviderError::Parse(format!("no analysis for photo {}", id)))
        })
        .collect()
}
