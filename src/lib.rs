pub mod config;
pub mod content;
pub mod discovery;
pub mod embedding;
pub mod entities;
pub mod error;
pub mod graph;
pub mod ids;
pub mod logging;
pub mod metadata_preserver;
pub mod parser;
pub mod processor;
pub mod relations;
pub mod state;
pub mod watcher;

pub use error::{Error, Result};

pub use config::Config;
pub use processor::{DiscoveredReport, LinkedReport, Processor, RecoverReport, VirtualFileInput};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::content::{hash16, HybridContentProvider};
use crate::graph::store::EmbeddedGraphStore;
use crate::graph::GraphStore;
use crate::watcher::Watcher;

/// Primary library API handle: a corpus rooted at a project directory,
/// wired to its graph store, content provider, and processor.
///
/// The project id scoping every record in the store is derived
/// deterministically from the canonicalized root path, so re-opening the
/// same directory always addresses the same project without requiring a
/// separate identity file.
pub struct Corpus {
    root: PathBuf,
    project_id: String,
    config: Config,
    store: Arc<dyn GraphStore>,
    processor: Processor,
}

impl Corpus {
    /// Open a corpus rooted at the given directory, loading config from
    /// `.corpusgraph`/`.env`/the shell environment and opening (or
    /// creating) its on-disk graph store.
    pub fn open(root: &Path) -> Result<Self> {
        let root = root.canonicalize().map_err(|e| {
            Error::Config(format!("cannot canonicalize root '{}': {e}", root.display()))
        })?;
        let config = Config::load(&root)?;
        Self::open_with_config(root, config)
    }

    /// Open a corpus with an explicit configuration, useful for tests or
    /// programmatic setup.
    pub fn open_with_config(root: PathBuf, config: Config) -> Result<Self> {
        let root = if root.is_relative() {
            root.canonicalize().map_err(|e| {
                Error::Config(format!("cannot canonicalize root '{}': {e}", root.display()))
            })?
        } else {
            root
        };

        let project_id = hash16(root.to_string_lossy().as_bytes());

        let store_path = if config.store_file.is_absolute() {
            config.store_file.clone()
        } else {
            root.join(&config.store_file)
        };
        let store: Arc<dyn GraphStore> = Arc::new(EmbeddedGraphStore::open_or_create(&store_path)?);

        let content = Arc::new(HybridContentProvider::from_parts(root.clone(), store.clone()));
        let processor = Processor::new(project_id.clone(), store.clone(), content, config.clone())?;

        info!(root = %root.display(), project_id = %project_id, "opened corpus");

        Ok(Self {
            root,
            project_id,
            config,
            store,
            processor,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn processor(&self) -> &Processor {
        &self.processor
    }

    pub fn store(&self) -> Arc<dyn GraphStore> {
        Arc::clone(&self.store)
    }

    /// Run discovery over the configured source directories, then drive
    /// every discovered file through parsing, linking, entity extraction,
    /// and embedding (spec.md §4.9 steps 1-2).
    pub async fn ingest(&self) -> Result<(DiscoveredReport, LinkedReport)> {
        let discovery = discovery::FileDiscovery::new(&self.root, &self.config);
        let paths = discovery.discover()?;

        let entries: Vec<graph::DiscoveredEntry> = paths
            .iter()
            .filter_map(|relative| {
                let absolute = self.root.join(relative);
                let bytes = std::fs::read(&absolute).ok()?;
                Some(graph::DiscoveredEntry {
                    relative_path: relative.to_string_lossy().to_string(),
                    absolute_path: Some(absolute.to_string_lossy().to_string()),
                    raw_content_hash: hash16(&bytes),
                    raw_content: None,
                    is_virtual: false,
                })
            })
            .collect();

        info!(files = entries.len(), "discovered corpus files");
        self.store.mark_discovered_batch(&self.project_id, entries).await?;

        let discovered_report = self.processor.process_discovered().await?;
        let linked_report = self.processor.process_linked().await?;
        self.store.save().await?;

        info!(
            files_parsed = discovered_report.files_parsed,
            files_embedded = linked_report.files_embedded,
            "ingestion complete"
        );
        Ok((discovered_report, linked_report))
    }

    /// Ingest in-memory content with no filesystem backing (spec.md §4.9
    /// step 6).
    pub async fn ingest_virtual_files(&self, inputs: Vec<VirtualFileInput>) -> Result<(DiscoveredReport, LinkedReport)> {
        let result = self.processor.ingest_virtual_files(inputs).await?;
        self.store.save().await?;
        Ok(result)
    }

    /// Reset crash-interrupted and retryable-error files back to
    /// `discovered` (spec.md §4.9 step 5).
    pub async fn recover(&self) -> Result<RecoverReport> {
        let report = self.processor.recover().await?;
        self.store.save().await?;
        Ok(report)
    }

    /// Re-read a single file off disk and drive it through the full
    /// pipeline on its own, bypassing discovery over the rest of the
    /// corpus (spec.md §4.9 step 4).
    pub async fn reindex(&self, relative_path: &Path) -> Result<()> {
        let absolute = self.root.join(relative_path);
        let bytes = std::fs::read(&absolute).map_err(Error::Io)?;
        let entry = graph::DiscoveredEntry {
            relative_path: relative_path.to_string_lossy().to_string(),
            absolute_path: Some(absolute.to_string_lossy().to_string()),
            raw_content_hash: hash16(&bytes),
            raw_content: None,
            is_virtual: false,
        };
        self.store.mark_discovered_batch(&self.project_id, vec![entry]).await?;

        let uuid = crate::ids::file_uuid(&self.project_id, &relative_path.to_string_lossy());
        let file = self
            .store
            .get_file(&uuid)
            .await?
            .ok_or_else(|| Error::NotFound { path: uuid.into() })?;

        self.processor.process_file(file).await?;
        self.store.save().await?;
        Ok(())
    }

    /// Per-file-state counts for the whole project.
    pub async fn state_stats(&self) -> Result<std::collections::HashMap<graph::FileState, usize>> {
        self.store.get_state_stats(&self.project_id).await
    }

    /// Start watching source directories for changes, processing each
    /// changed file incrementally through the processor. Blocks until
    /// `cancel` is triggered.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
        if !self.config.watch_enabled {
            return Err(Error::Config("file watching is disabled in config".into()));
        }
        let watcher = Watcher::new(self.config.clone(), &self.root, self.project_id.clone(), self.store.clone());
        watcher.watch(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> Config {
        Config {
            embedding_provider: config::EmbeddingProviderType::Mock,
            embedding_model: "mock".into(),
            embedding_dimensions: 8,
            embedding_batch_size: 10,
            openai_api_key: None,
            ollama_host: "http://localhost:11434".into(),
            embedding_endpoint: None,
            entity_service_endpoint: "http://127.0.0.1:1".into(),
            entity_confidence_threshold: 0.5,
            entity_classify_sample_chars: 2000,
            entity_http_batch_cap: 100,
            entity_batch_node_cap: 1000,
            source_dirs: vec![PathBuf::from(".")],
            store_file: root.join(".corpusgraph.store"),
            ignore_patterns: vec![],
            watch_enabled: false,
            watch_debounce_ms: 500,
            chunk_max_chars: 1500,
            chunk_max_lines: 120,
            chunk_overlap_lines: 5,
            chunk_min_chars: 2,
            concurrency_limit: 4,
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn open_then_ingest_discovers_and_embeds_a_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("note.md"), "# Title\n\nsome body text\n").unwrap();

        let corpus = Corpus::open_with_config(dir.path().to_path_buf(), test_config(dir.path())).unwrap();
        let (discovered, linked) = corpus.ingest().await.unwrap();
        assert_eq!(discovered.files_parsed, 1);
        assert_eq!(linked.files_embedded, 1);

        let stats = corpus.state_stats().await.unwrap();
        assert_eq!(stats.get(&graph::FileState::Embedded).copied().unwrap_or(0), 1);
    }

    #[tokio::test]
    async fn project_id_is_stable_across_reopen() {
        let dir = TempDir::new().unwrap();
        let first = Corpus::open_with_config(dir.path().to_path_buf(), test_config(dir.path())).unwrap();
        let second = Corpus::open_with_config(dir.path().to_path_buf(), test_config(dir.path())).unwrap();
        assert_eq!(first.project_id(), second.project_id());
    }
}
