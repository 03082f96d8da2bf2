use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

use super::provider::EmbeddingProvider;

/// Local Ollama embedding provider, hitting `/api/embed` with batched
/// input (Ollama accepts an `input` array since 0.3).
pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaProvider {
    pub fn new(host: String, model: String, dimensions: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::EmbeddingProviderMissing(format!("http client: {e}")))?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            model,
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.host);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(|e| Error::EmbeddingProviderMissing(format!("ollama request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingProviderMissing(format!(
                "ollama returned {status}: {body}"
            )));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingProviderMissing(format!("ollama response decode: {e}")))?;

        Ok(parsed.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
