//! Description embeddings through an OpenAI-compatible `/embeddings` endpoint.

use serde::Deserialize;
use sort_types::{Embedder, EmbedderError};

const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Option<Vec<EmbeddingItem>>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Embeds photo descriptions, all texts of a batch in one request.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(url: impl Into<String>, api_key: Option<String>, model: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }

    /// Reads `EMBED_API_URL`, `EMBED_API_KEY`, `EMBED_MODEL`.
    pub fn from_env() -> Self {
        let url = std::env::var("EMBED_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/embeddings".to_string());
        let api_key = std::env::var("EMBED_API_KEY").ok();
        let model = std::env::var("EMBED_MODEL").ok();
        Self::new(url, api_key, model.as_deref())
    }
}

#[async_trait::async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut req = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "input": texts, "model": self.model }));
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req
            .send()
            .await
            .map_err(|e| EmbedderError::Other(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::warn!(%status, model = %self.model, "embedding request rejected");
            return Err(EmbedderError::Other(format!(
                "embed API error {}: {}",
                status, body
            )));
        }
        let parsed: EmbeddingsResponse = res
            .json()
            .await
            .map_err(|e| EmbedderError::Other(e.to_string()))?;
        let mut items = parsed.data.ok_or(EmbedderError::EmptyResponse)?;
        if items.len() != texts.len() {
            return Err(EmbedderError::Other(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                items.len()
            )));
        }
        // The API may answer out of order; `index` refers to the input position.
        items.sort_by_key(|i| i.index);
        Ok(items.into_iter().map(|i| i.embedding).collect())
    }
}
