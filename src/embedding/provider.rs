use async_trait::async_trait;

use crate::config::{Config, EmbeddingProviderType};
use crate::error::{Error, Result};

use super::mock::MockProvider;
use super::ollama::OllamaProvider;
use super::onprem::OnPremProvider;
use super::openai::OpenAIProvider;

/// Batch embedding provider contract (spec.md §6.2): `embed_batch`
/// (texts -> vectors), `embed_single`, and provider/model/dimension
/// metadata used to provision vector indexes. Dimension is discovered
/// once per provider and is fixed for the provider's lifetime.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| Error::EmbeddingProviderMissing("provider returned no vector".into()))
    }

    fn dimensions(&self) -> usize;
    fn name(&self) -> &str;
    fn model(&self) -> &str;
}

/// Build the configured embedding provider. Variants: a cloud provider
/// (OpenAI, requires an API key), a local provider (Ollama), an on-prem
/// inference server, and a deterministic mock for tests.
pub fn create_provider(config: &Config) -> Result<Box<dyn EmbeddingProvider>> {
    match config.embedding_provider {
        EmbeddingProviderType::OpenAI => {
            let api_key = config.openai_api_key.as_ref().ok_or_else(|| {
                Error::EmbeddingProviderMissing("OpenAI provider requires OPENAI_API_KEY".into())
            })?;
            Ok(Box::new(OpenAIProvider::new(
                api_key.clone(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
                config.embedding_endpoint.clone(),
            )?))
        }
        EmbeddingProviderType::Ollama => Ok(Box::new(OllamaProvider::new(
            config.ollama_host.clone(),
            config.embedding_model.clone(),
            config.embedding_dimensions,
        )?)),
        EmbeddingProviderType::OnPrem => {
            let endpoint = config.embedding_endpoint.as_ref().ok_or_else(|| {
                Error::EmbeddingProviderMissing(
                    "on-prem provider requires CGI_EMBEDDING_ENDPOINT".into(),
                )
            })?;
            Ok(Box::new(OnPremProvider::new(
                endpoint.clone(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
            )?))
        }
        EmbeddingProviderType::Mock => Ok(Box::new(MockProvider::new(
            config.embedding_model.clone(),
            config.embedding_dimensions,
        ))),
    }
}
