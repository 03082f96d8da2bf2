use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

use super::provider::EmbeddingProvider;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";

/// OpenAI-compatible embedding provider. Also serves any endpoint that
/// mirrors OpenAI's `/v1/embeddings` request/response shape, since
/// `endpoint` is overridable.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimensions: usize,
    endpoint: String,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIProvider {
    pub fn new(
        api_key: String,
        model: String,
        dimensions: usize,
        endpoint: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::EmbeddingProviderMissing(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            model,
            dimensions,
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
                "dimensions": self.dimensions,
            }))
            .send()
            .await
            .map_err(|e| Error::EmbeddingProviderMissing(format!("openai request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingProviderMissing(format!(
                "openai returned {status}: {body}"
            )));
        }

        let mut parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingProviderMissing(format!("openai response decode: {e}")))?;

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_public_endpoint() {
        let provider = OpenAIProvider::new("key".into(), "text-embedding-3-small".into(), 1536, None).unwrap();
        assert_eq!(provider.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn honors_custom_endpoint() {
        let provider = OpenAIProvider::new(
            "key".into(),
            "text-embedding-3-small".into(),
            1536,
            Some("http://localhost:9999/v1/embeddings".into()),
        )
        .unwrap();
        assert_eq!(provider.endpoint, "http://localhost:9999/v1/embeddings");
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let provider = OpenAIProvider::new("key".into(), "text-embedding-3-small".into(), 1536, None).unwrap();
        let result = provider.embed_batch(&[]).await.unwrap();
        assert!(result.is_empty());
    }
}
