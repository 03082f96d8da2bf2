use std::collections::HashMap;
use std::path::{Path, PathBuf};

use corpus_graph_ingest::config::{Config, EmbeddingProviderType};
use corpus_graph_ingest::graph::{ErrorCause, FileState, TransitionOptions};
use corpus_graph_ingest::processor::VirtualFileInput;
use corpus_graph_ingest::Corpus;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DIMS: usize = 8;

fn mock_config(root: &Path) -> Config {
    Config {
        embedding_provider: EmbeddingProviderType::Mock,
        embedding_model: "mock-model".into(),
        embedding_dimensions: DIMS,
        embedding_batch_size: 100,
        openai_api_key: None,
        ollama_host: "http://localhost:11434".into(),
        embedding_endpoint: None,
        entity_service_endpoint: "http://127.0.0.1:1".into(),
        entity_confidence_threshold: 0.5,
        entity_classify_sample_chars: 2000,
        entity_http_batch_cap: 100,
        entity_batch_node_cap: 1000,
        source_dirs: vec![PathBuf::from(".")],
        store_file: root.join("test.corpusgraph.store"),
        ignore_patterns: vec![],
        watch_enabled: false,
        watch_debounce_ms: 500,
        chunk_max_chars: 1500,
        chunk_max_lines: 120,
        chunk_overlap_lines: 5,
        chunk_min_chars: 8,
        concurrency_limit: 4,
        max_retries: 3,
    }
}

fn setup_project() -> (TempDir, Corpus) {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    std::fs::write(root.join("a.md"), "# A\n\nfirst doc body.\n").unwrap();
    std::fs::write(root.join("b.md"), "# B\n\nsecond doc body.\n").unwrap();

    let corpus = Corpus::open_with_config(root.to_path_buf(), mock_config(root)).unwrap();
    (dir, corpus)
}

#[tokio::test]
async fn ingest_discovers_parses_and_embeds_all_files() {
    let (_dir, corpus) = setup_project();

    let (discovered, linked) = corpus.ingest().await.unwrap();
    assert_eq!(discovered.files_parsed, 2);
    assert_eq!(discovered.files_errored, 0);
    assert_eq!(linked.files_embedded, 2);

    let stats = corpus.state_stats().await.unwrap();
    assert_eq!(stats.get(&FileState::Embedded).copied().unwrap_or(0), 2);
}

#[tokio::test]
async fn ingest_is_idempotent_on_unchanged_files() {
    let (_dir, corpus) = setup_project();

    let (first_discovered, first_linked) = corpus.ingest().await.unwrap();
    assert_eq!(first_discovered.files_parsed, 2);
    assert_eq!(first_linked.files_embedded, 2);

    // Re-running ingest with no filesystem changes should not reprocess
    // files that are already sitting in the embedded terminal state.
    let (second_discovered, second_linked) = corpus.ingest().await.unwrap();
    assert_eq!(second_discovered.files_parsed, 0);
    assert_eq!(second_linked.files_embedded, 0);

    let stats = corpus.state_stats().await.unwrap();
    assert_eq!(stats.get(&FileState::Embedded).copied().unwrap_or(0), 2);
}

#[tokio::test]
async fn ingest_virtual_files_skips_the_filesystem() {
    let dir = TempDir::new().unwrap();
    let corpus = Corpus::open_with_config(dir.path().to_path_buf(), mock_config(dir.path())).unwrap();

    let inputs = vec![VirtualFileInput {
        relative_path: "virtual/note.md".into(),
        content: "# Virtual\n\nlives only in memory.\n".into(),
        additional_properties: HashMap::new(),
    }];

    let (discovered, linked) = corpus.ingest_virtual_files(inputs).await.unwrap();
    assert_eq!(discovered.files_parsed, 1);
    assert_eq!(linked.files_embedded, 1);

    // No file was ever written to disk.
    assert!(!dir.path().join("virtual/note.md").exists());
}

#[tokio::test]
async fn reindex_processes_a_single_file_without_touching_others() {
    let (_dir, corpus) = setup_project();

    corpus.reindex(Path::new("a.md")).await.unwrap();

    let stats = corpus.state_stats().await.unwrap();
    assert_eq!(stats.get(&FileState::Embedded).copied().unwrap_or(0), 1);
    assert_eq!(stats.get(&FileState::Discovered).copied().unwrap_or(0), 0);
}

#[tokio::test]
async fn reindex_rereads_changed_content_from_disk() {
    let (dir, corpus) = setup_project();

    corpus.reindex(Path::new("a.md")).await.unwrap();
    std::fs::write(dir.path().join("a.md"), "# A\n\nupdated body text.\n").unwrap();
    corpus.reindex(Path::new("a.md")).await.unwrap();

    let stats = corpus.state_stats().await.unwrap();
    assert_eq!(stats.get(&FileState::Embedded).copied().unwrap_or(0), 1);
}

#[tokio::test]
async fn recover_resets_files_stuck_in_intermediate_states() {
    let (_dir, corpus) = setup_project();
    corpus.ingest().await.unwrap();

    let store = corpus.store();
    let embedded = store
        .get_files_in_state(corpus.project_id(), FileState::Embedded)
        .await
        .unwrap();
    assert_eq!(embedded.len(), 2);

    // Simulate a crash that left one already-embedded file queued for a
    // fresh pass: dropped back to discovered, then caught mid-parse.
    store
        .transition_file(&embedded[0].uuid, FileState::Discovered, TransitionOptions::default())
        .await
        .unwrap();
    store
        .transition_file(&embedded[0].uuid, FileState::Parsing, TransitionOptions::default())
        .await
        .unwrap();

    let report = corpus.recover().await.unwrap();
    assert_eq!(report.states_reset, 1);
    assert_eq!(report.files_recovered, 1);
    assert_eq!(report.files_in_error, 0);

    let stats = corpus.state_stats().await.unwrap();
    assert_eq!(stats.get(&FileState::Discovered).copied().unwrap_or(0), 1);
    assert_eq!(stats.get(&FileState::Embedded).copied().unwrap_or(0), 1);
}

#[tokio::test]
async fn recover_resets_retryable_errors_but_not_exhausted_ones() {
    let (_dir, corpus) = setup_project();
    corpus.ingest().await.unwrap();

    let store = corpus.store();
    let embedded = store
        .get_files_in_state(corpus.project_id(), FileState::Embedded)
        .await
        .unwrap();
    assert_eq!(embedded.len(), 2);

    let options = TransitionOptions {
        error_type: Some(ErrorCause::Parse),
        error_message: Some("simulated parse failure".into()),
    };
    store
        .transition_file(&embedded[0].uuid, FileState::Error, options.clone())
        .await
        .unwrap();
    store
        .transition_file(&embedded[1].uuid, FileState::Error, options)
        .await
        .unwrap();

    // Exhaust retries on the second file so recovery should leave it alone.
    for _ in 0..corpus.config().max_retries {
        store
            .transition_file(
                &embedded[1].uuid,
                FileState::Error,
                TransitionOptions {
                    error_type: Some(ErrorCause::Parse),
                    error_message: Some("still failing".into()),
                },
            )
            .await
            .unwrap();
    }

    let report = corpus.recover().await.unwrap();
    assert_eq!(report.files_recovered, 1);
    assert_eq!(report.files_in_error, 1);

    let stats = corpus.state_stats().await.unwrap();
    assert_eq!(stats.get(&FileState::Discovered).copied().unwrap_or(0), 1);
    assert_eq!(stats.get(&FileState::Error).copied().unwrap_or(0), 1);
}

#[tokio::test]
async fn state_stats_reflects_project_scope() {
    let (_dir, corpus) = setup_project();
    let stats = corpus.state_stats().await.unwrap();
    assert_eq!(stats.get(&FileState::Discovered).copied().unwrap_or(0), 0);

    corpus.ingest().await.unwrap();
    let stats = corpus.state_stats().await.unwrap();
    let total: usize = stats.values().sum();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn watch_errors_when_disabled_in_config() {
    let (_dir, corpus) = setup_project();
    let cancel = CancellationToken::new();
    let result = corpus.watch(cancel).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn project_id_is_derived_from_canonical_root_and_stable() {
    let dir = TempDir::new().unwrap();
    let first = Corpus::open_with_config(dir.path().to_path_buf(), mock_config(dir.path())).unwrap();
    let second = Corpus::open(dir.path()).unwrap();
    assert_eq!(first.project_id(), second.project_id());
    assert_eq!(first.project_id().len(), 16);
}

#[tokio::test]
async fn open_rejects_nonexistent_root() {
    let missing = PathBuf::from("/nonexistent/path/for/corpus-graph-ingest-tests");
    let result = Corpus::open(&missing);
    assert!(result.is_err());
}
