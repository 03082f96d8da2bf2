use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Client-side chunking cap: requests are split to at most this many
/// texts per HTTP call (spec.md §6.1).
pub const MAX_TEXTS_PER_CALL: usize = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_name: Option<String>,
    pub device: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelLoadResponse {
    pub status: String,
    pub was_loaded: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyBatchResponse {
    pub classifications: Vec<Vec<Classification>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractBatchRequest<'a> {
    pub texts: &'a [String],
    pub entity_types: &'a [String],
    pub relation_types: &'a [String],
    pub include_confidence: bool,
    pub include_spans: bool,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedRelation {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractResult {
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractBatchResponse {
    pub results: Vec<ExtractResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainPreset {
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub relation_types: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub skip_embedding_types: Vec<String>,
}

/// HTTP client for the entity extraction service (spec.md §6.1). Batches
/// larger than [`MAX_TEXTS_PER_CALL`] are split client-side.
pub struct EntityServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl EntityServiceClient {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::EntityServiceUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let resp = self
            .client
            .get(self.url("/health"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| Error::EntityServiceUnavailable(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| Error::EntityServiceUnavailable(format!("health decode: {e}")))
    }

    pub async fn load_model(&self) -> Result<ModelLoadResponse> {
        self.post_empty("/model/load").await
    }

    pub async fn unload_model(&self) -> Result<ModelLoadResponse> {
        self.post_empty("/model/unload").await
    }

    async fn post_empty(&self, path: &str) -> Result<ModelLoadResponse> {
        let resp = self
            .client
            .post(self.url(path))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| Error::EntityServiceUnavailable(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| Error::EntityServiceUnavailable(format!("{path} decode: {e}")))
    }

    pub async fn classify_batch(&self, texts: &[String]) -> Result<Vec<Vec<Classification>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_TEXTS_PER_CALL) {
            let timeout = Duration::from_secs(10 + chunk.len() as u64 / 2);
            let resp = self
                .client
                .post(self.url("/classify/batch"))
                .timeout(timeout)
                .json(chunk)
                .send()
                .await
                .map_err(classify_timeout_or_unavailable)?;
            let parsed: ClassifyBatchResponse = resp
                .json()
                .await
                .map_err(|e| Error::EntityServiceUnavailable(format!("classify decode: {e}")))?;
            out.extend(parsed.classifications);
        }
        Ok(out)
    }

    pub async fn extract_batch(
        &self,
        texts: &[String],
        entity_types: &[String],
        relation_types: &[String],
    ) -> Result<Vec<ExtractResult>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_TEXTS_PER_CALL) {
            let request = ExtractBatchRequest {
                texts: chunk,
                entity_types,
                relation_types,
                include_confidence: true,
                include_spans: true,
                batch_size: chunk.len(),
            };
            let timeout = Duration::from_secs(30 + chunk.len() as u64);
            let resp = self
                .client
                .post(self.url("/extract/batch"))
                .timeout(timeout)
                .json(&request)
                .send()
                .await
                .map_err(extract_timeout_or_unavailable)?;
            let parsed: ExtractBatchResponse = resp
                .json()
                .await
                .map_err(|e| Error::EntityServiceUnavailable(format!("extract decode: {e}")))?;
            out.extend(parsed.results);
        }
        Ok(out)
    }

    pub async fn presets(&self) -> Result<HashMap<String, DomainPreset>> {
        let resp = self
            .client
            .get(self.url("/presets"))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| Error::EntityServiceUnavailable(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| Error::EntityServiceUnavailable(format!("presets decode: {e}")))
    }

    pub async fn service_config(&self) -> Result<ServiceConfig> {
        let resp = self
            .client
            .get(self.url("/config"))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| Error::EntityServiceUnavailable(e.to_string()))?;
        resp.json()
            .await
            .map_err(|e| Error::EntityServiceUnavailable(format!("config decode: {e}")))
    }
}

fn classify_timeout_or_unavailable(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::EntityTimeout(Duration::from_secs(10))
    } else {
        Error::EntityServiceUnavailable(e.to_string())
    }
}

fn extract_timeout_or_unavailable(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::EntityTimeout(Duration::from_secs(30))
    } else {
        Error::EntityServiceUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_slash() {
        let client = EntityServiceClient::new("http://localhost:8008/".into()).unwrap();
        assert_eq!(client.base_url, "http://localhost:8008");
    }

    #[test]
    fn url_joins_path() {
        let client = EntityServiceClient::new("http://localhost:8008".into()).unwrap();
        assert_eq!(client.url("/health"), "http://localhost:8008/health");
    }
}
