use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

use super::provider::EmbeddingProvider;

/// Self-hosted inference server, speaking the same batch-in/batch-out
/// shape as the entity extraction service (spec.md §6.1) rather than
/// a vendor-specific API: `POST {endpoint}/embed {model, texts}`.
pub struct OnPremProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct OnPremEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OnPremProvider {
    pub fn new(endpoint: String, model: String, dimensions: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::EmbeddingProviderMissing(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model,
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OnPremProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/embed", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "model": self.model,
                "texts": texts,
            }))
            .send()
            .await
            .map_err(|e| Error::EmbeddingProviderMissing(format!("on-prem request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingProviderMissing(format!(
                "on-prem server returned {status}: {body}"
            )));
        }

        let parsed: OnPremEmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingProviderMissing(format!("on-prem response decode: {e}")))?;

        Ok(parsed.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "onprem"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
