use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::Error;

/// Supported embedding provider backends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EmbeddingProviderType {
    OpenAI,
    Ollama,
    OnPrem,
    Mock,
}

impl FromStr for EmbeddingProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "onprem" | "on-prem" | "custom" => Ok(Self::OnPrem),
            "mock" => Ok(Self::Mock),
            other => Err(Error::Config(format!(
                "unknown embedding provider '{other}': expected openai, ollama, onprem, or mock"
            ))),
        }
    }
}

/// Full configuration for the ingestion pipeline, loaded from environment /
/// `.corpusgraph` project file / `.env` / built-in defaults.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    // --- embedding provider ---
    pub embedding_provider: EmbeddingProviderType,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embedding_batch_size: usize,
    pub openai_api_key: Option<String>,
    pub ollama_host: String,
    pub embedding_endpoint: Option<String>,

    // --- entity extraction service ---
    pub entity_service_endpoint: String,
    pub entity_confidence_threshold: f32,
    pub entity_classify_sample_chars: usize,
    pub entity_http_batch_cap: usize,
    pub entity_batch_node_cap: usize,

    // --- discovery / source ---
    pub source_dirs: Vec<PathBuf>,
    pub store_file: PathBuf,
    pub ignore_patterns: Vec<String>,

    // --- watcher ---
    pub watch_enabled: bool,
    pub watch_debounce_ms: u64,

    // --- chunking ---
    pub chunk_max_chars: usize,
    pub chunk_max_lines: usize,
    pub chunk_overlap_lines: usize,
    pub chunk_min_chars: usize,

    // --- processor / concurrency ---
    pub concurrency_limit: usize,
    pub max_retries: usize,
}

impl Config {
    /// Load configuration with priority: shell env > `.corpusgraph` file > `.env` file > built-in defaults.
    pub fn load(project_root: &Path) -> Result<Self, Error> {
        // `.corpusgraph` is loaded first; dotenvy::from_path never overrides
        // vars already present in the process environment, so shell env
        // always wins regardless of load order.
        let _ = dotenvy::from_path(project_root.join(".corpusgraph"));
        let _ = dotenvy::from_path(project_root.join(".env"));

        let embedding_provider = env_or_default("CGI_EMBEDDING_PROVIDER", "mock")
            .parse::<EmbeddingProviderType>()?;
        let embedding_model = env_or_default("CGI_EMBEDDING_MODEL", "text-embedding-3-small");
        let embedding_dimensions = parse_env::<usize>("CGI_EMBEDDING_DIMENSIONS", 1536)?;
        let embedding_batch_size = parse_env::<usize>("CGI_EMBEDDING_BATCH_SIZE", 100)?;
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let ollama_host = env_or_default("OLLAMA_HOST", "http://localhost:11434");
        let embedding_endpoint = std::env::var("CGI_EMBEDDING_ENDPOINT").ok();

        let entity_service_endpoint =
            env_or_default("CGI_ENTITY_SERVICE_URL", "http://localhost:8008");
        let entity_confidence_threshold =
            parse_env::<f32>("CGI_ENTITY_CONFIDENCE_THRESHOLD", 0.5)?;
        let entity_classify_sample_chars =
            parse_env::<usize>("CGI_ENTITY_CLASSIFY_SAMPLE_CHARS", 2000)?;
        let entity_http_batch_cap = parse_env::<usize>("CGI_ENTITY_HTTP_BATCH_CAP", 100)?;
        let entity_batch_node_cap = parse_env::<usize>("CGI_ENTITY_BATCH_NODE_CAP", 1000)?;

        let source_dirs = parse_comma_list_path("CGI_SOURCE_DIRS", vec![PathBuf::from(".")]);
        let store_file = PathBuf::from(env_or_default("CGI_STORE_FILE", ".corpusgraph.store"));
        let ignore_patterns = parse_comma_list_string("CGI_IGNORE_PATTERNS", vec![]);

        let watch_enabled = parse_env_bool("CGI_WATCH", true)?;
        let watch_debounce_ms = parse_env::<u64>("CGI_WATCH_DEBOUNCE_MS", 500)?;

        let chunk_max_chars = parse_env::<usize>("CGI_CHUNK_MAX_CHARS", 1500)?;
        let chunk_max_lines = parse_env::<usize>("CGI_CHUNK_MAX_LINES", 120)?;
        let chunk_overlap_lines = parse_env::<usize>("CGI_CHUNK_OVERLAP_LINES", 5)?;
        let chunk_min_chars = parse_env::<usize>("CGI_CHUNK_MIN_CHARS", 8)?;

        let concurrency_limit = parse_env::<usize>("CGI_CONCURRENCY_LIMIT", 10)?;
        let max_retries = parse_env::<usize>("CGI_MAX_RETRIES", 3)?;

        let config = Self {
            embedding_provider,
            embedding_model,
            embedding_dimensions,
            embedding_batch_size,
            openai_api_key,
            ollama_host,
            embedding_endpoint,
            entity_service_endpoint,
            entity_confidence_threshold,
            entity_classify_sample_chars,
            entity_http_batch_cap,
            entity_batch_node_cap,
            source_dirs,
            store_file,
            ignore_patterns,
            watch_enabled,
            watch_debounce_ms,
            chunk_max_chars,
            chunk_max_lines,
            chunk_overlap_lines,
            chunk_min_chars,
            concurrency_limit,
            max_retries,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate constraint invariants on the loaded config.
    fn validate(&self) -> Result<(), Error> {
        if self.embedding_dimensions == 0 {
            return Err(Error::Config("embedding_dimensions must be > 0".into()));
        }
        if self.embedding_batch_size == 0 {
            return Err(Error::Config("embedding_batch_size must be > 0".into()));
        }
        if self.chunk_overlap_lines >= self.chunk_max_lines {
            return Err(Error::Config(format!(
                "chunk_overlap_lines ({}) must be less than chunk_max_lines ({})",
                self.chunk_overlap_lines, self.chunk_max_lines
            )));
        }
        if !(0.0..=1.0).contains(&self.entity_confidence_threshold) {
            return Err(Error::Config(format!(
                "entity_confidence_threshold ({}) must be in [0.0, 1.0]",
                self.entity_confidence_threshold
            )));
        }
        if self.concurrency_limit == 0 {
            return Err(Error::Config("concurrency_limit must be > 0".into()));
        }
        if self.entity_http_batch_cap == 0 || self.entity_http_batch_cap > 100 {
            return Err(Error::Config(
                "entity_http_batch_cap must be in 1..=100".into(),
            ));
        }
        Ok(())
    }
}

/// Read an env var or return a default string value.
fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var into a typed value, using a default if not set.
fn parse_env<T>(key: &str, default: T) -> Result<T, Error>
where
    T: FromStr + ToString,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| Error::Config(format!("failed to parse {key}='{val}': {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a boolean env var (true/false/1/0).
fn parse_env_bool(key: &str, default: bool) -> Result<bool, Error> {
    match std::env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::Config(format!(
                "failed to parse {key}='{val}': expected true/false/1/0/yes/no"
            ))),
        },
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated env var into Vec<PathBuf>, trimming whitespace.
fn parse_comma_list_path(key: &str, default: Vec<PathBuf>) -> Vec<PathBuf> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => {
            val.split(',').map(|s| PathBuf::from(s.trim())).collect()
        }
        _ => default,
    }
}

/// Parse a comma-separated env var into Vec<String>, trimming whitespace.
fn parse_comma_list_string(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val.split(',').map(|s| s.trim().to_string()).collect(),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::path::PathBuf;

    const ALL_VARS: &[&str] = &[
        "CGI_EMBEDDING_PROVIDER",
        "CGI_EMBEDDING_MODEL",
        "CGI_EMBEDDING_DIMENSIONS",
        "CGI_EMBEDDING_BATCH_SIZE",
        "OPENAI_API_KEY",
        "OLLAMA_HOST",
        "CGI_EMBEDDING_ENDPOINT",
        "CGI_ENTITY_SERVICE_URL",
        "CGI_ENTITY_CONFIDENCE_THRESHOLD",
        "CGI_ENTITY_CLASSIFY_SAMPLE_CHARS",
        "CGI_ENTITY_HTTP_BATCH_CAP",
        "CGI_ENTITY_BATCH_NODE_CAP",
        "CGI_SOURCE_DIRS",
        "CGI_STORE_FILE",
        "CGI_IGNORE_PATTERNS",
        "CGI_WATCH",
        "CGI_WATCH_DEBOUNCE_MS",
        "CGI_CHUNK_MAX_CHARS",
        "CGI_CHUNK_MAX_LINES",
        "CGI_CHUNK_OVERLAP_LINES",
        "CGI_CHUNK_MIN_CHARS",
        "CGI_CONCURRENCY_LIMIT",
        "CGI_MAX_RETRIES",
    ];

    fn clear_all() {
        for var in ALL_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn provider_type_case_insensitive() {
        assert_eq!(
            "openai".parse::<EmbeddingProviderType>().unwrap(),
            EmbeddingProviderType::OpenAI
        );
        assert_eq!(
            "OnPrem".parse::<EmbeddingProviderType>().unwrap(),
            EmbeddingProviderType::OnPrem
        );
        assert_eq!(
            "MOCK".parse::<EmbeddingProviderType>().unwrap(),
            EmbeddingProviderType::Mock
        );
    }

    #[test]
    fn provider_type_unknown_rejected() {
        let result = "unknown".parse::<EmbeddingProviderType>();
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn default_values_match_spec() {
        clear_all();
        let config = Config::load(Path::new("/nonexistent")).unwrap();

        assert_eq!(config.embedding_provider, EmbeddingProviderType::Mock);
        assert_eq!(config.embedding_dimensions, 1536);
        assert_eq!(config.embedding_batch_size, 100);
        assert_eq!(config.source_dirs, vec![PathBuf::from(".")]);
        assert_eq!(config.store_file, PathBuf::from(".corpusgraph.store"));
        assert!(config.watch_enabled);
        assert_eq!(config.watch_debounce_ms, 500);
        assert_eq!(config.chunk_max_chars, 1500);
        assert_eq!(config.chunk_overlap_lines, 5);
        assert_eq!(config.concurrency_limit, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.entity_http_batch_cap, 100);
    }

    #[test]
    #[serial]
    fn validation_rejects_zero_dimensions() {
        clear_all();
        std::env::set_var("CGI_EMBEDDING_DIMENSIONS", "0");
        let result = Config::load(Path::new("/nonexistent"));
        std::env::remove_var("CGI_EMBEDDING_DIMENSIONS");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn validation_rejects_overlap_exceeds_max() {
        clear_all();
        std::env::set_var("CGI_CHUNK_MAX_LINES", "10");
        std::env::set_var("CGI_CHUNK_OVERLAP_LINES", "20");
        let result = Config::load(Path::new("/nonexistent"));
        std::env::remove_var("CGI_CHUNK_MAX_LINES");
        std::env::remove_var("CGI_CHUNK_OVERLAP_LINES");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn validation_rejects_confidence_out_of_range() {
        clear_all();
        std::env::set_var("CGI_ENTITY_CONFIDENCE_THRESHOLD", "1.5");
        let result = Config::load(Path::new("/nonexistent"));
        std::env::remove_var("CGI_ENTITY_CONFIDENCE_THRESHOLD");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn validation_rejects_batch_cap_over_100() {
        clear_all();
        std::env::set_var("CGI_ENTITY_HTTP_BATCH_CAP", "101");
        let result = Config::load(Path::new("/nonexistent"));
        std::env::remove_var("CGI_ENTITY_HTTP_BATCH_CAP");
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn comma_separated_source_dirs() {
        clear_all();
        std::env::set_var("CGI_SOURCE_DIRS", " docs , notes ");
        let dirs = parse_comma_list_path("CGI_SOURCE_DIRS", vec![]);
        std::env::remove_var("CGI_SOURCE_DIRS");
        assert_eq!(dirs, vec![PathBuf::from("docs"), PathBuf::from("notes")]);
    }
}
