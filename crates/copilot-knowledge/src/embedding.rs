use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use copilot_core::knowledge::{Embedder, KnowledgeError};

/// Embedding client config
#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

/// Embedding backend speaking the `{"input": ...}` / `data[0].embedding`
/// wire format.
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    config: HttpEmbeddingConfig,
}

impl HttpEmbeddingClient {
    pub fn new(config: HttpEmbeddingConfig) -> Result<Self, KnowledgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KnowledgeError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn headers(&self) -> Result<HeaderMap, KnowledgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            headers.insert(
                HeaderName::from_static("api-key"),
                HeaderValue::from_str(key).map_err(|e| KnowledgeError::Http(e.to_string()))?,
            );
        }
        Ok(headers)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    embedding: Vec<f32>,
}

fn first_embedding(response: EmbeddingResponse) -> Result<Vec<f32>, KnowledgeError> {
    response
        .data
        .into_iter()
        .next()
        .map(|item| item.embedding)
        .filter(|vector| !vector.is_empty())
        .ok_or(KnowledgeError::EmptyEmbedding)
}

#[async_trait]
impl Embedder for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(self.headers()?)
            .json(&EmbeddingRequest { input: text })
            .send()
            .await
            .map_err(|e| KnowledgeError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "embedding request rejected");
            return Err(KnowledgeError::Response(format!("HTTP {}: {}", status, body)));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::Serialization(e.to_string()))?;
        let vector = first_embedding(parsed)?;
        debug!(dimensions = vector.len(), "text embedded");
        Ok(vector)
    }
}
