pub mod batch;
pub mod chunker;
pub mod mock;
pub mod ollama;
pub mod onprem;
pub mod openai;
pub mod provider;

pub use batch::{embed_tasks, EmbedTask};
pub use chunker::{chunk_text, count_tokens, ChunkSpan};
pub use provider::{create_provider, EmbeddingProvider};

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::content::hash16;
use crate::error::Result;
use crate::graph::model::{
    EdgeRecord, NodeRecord, NodeState, EDGE_HAS_EMBEDDING_CHUNK, LABEL_EMBEDDING_CHUNK, LABEL_ENTITY,
};
use crate::graph::GraphStore;
use crate::ids::chunk_uuid;

/// One embeddable view of a node: a property holding text, stored under
/// `name` both as the vector-index label and the `embedding_hashes` key.
/// Only the `content` view chunks (resolved Open Question 2 in
/// SPEC_FULL.md §4) — name/description views are short by construction.
#[derive(Debug, Clone, Copy)]
pub struct View {
    pub name: &'static str,
    pub property: &'static str,
    pub chunkable: bool,
}

const NAME_VIEW: View = View {
    name: "name",
    property: "_name",
    chunkable: false,
};
const CONTENT_VIEW: View = View {
    name: "content",
    property: "_content",
    chunkable: true,
};
const DESCRIPTION_VIEW: View = View {
    name: "description",
    property: "description",
    chunkable: false,
};

/// Views applicable to a node, keyed by label. Entities embed their name
/// and extracted description rather than raw content; everything else
/// embeds name and content.
pub fn views_for_labels(labels: &[String]) -> Vec<View> {
    if labels.iter().any(|l| l == "Entity") {
        vec![NAME_VIEW, DESCRIPTION_VIEW]
    } else {
        vec![NAME_VIEW, CONTENT_VIEW]
    }
}

/// Report of one `embed_pending` pass.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingReport {
    pub nodes_embedded: usize,
    pub views_embedded: usize,
    pub views_skipped_unchanged: usize,
    pub chunks_created: usize,
    pub api_calls: usize,
}

struct PendingView {
    target_uuid: String,
    view_name: String,
    text: String,
}

/// True if `node` is an Entity of one of the designated skip-embedding
/// sub-types (spec.md §4.7 "Skip set", e.g. price/date/quantity): such
/// nodes advance straight through the embedding phase without a vector.
fn is_skip_embedding_entity(node: &NodeRecord, skip_types: &[String]) -> bool {
    if skip_types.is_empty() || !node.has_label(LABEL_ENTITY) {
        return false;
    }
    node.properties
        .get("entityType")
        .and_then(|v| v.as_str())
        .map(|t| skip_types.iter().any(|s| s == t))
        .unwrap_or(false)
}

/// Drives the embedding phase (spec.md §4.7, C7): for each node in
/// `embedding` state, diff each configured view's content hash against
/// what's stored, skip unchanged views, chunk oversized content views,
/// batch-embed everything through the provider, and persist vectors plus
/// hashes back onto the graph before transitioning nodes to `ready`.
pub struct EmbeddingService {
    store: Arc<dyn GraphStore>,
    provider: Arc<dyn EmbeddingProvider>,
    chunk_max_chars: usize,
    chunk_max_lines: usize,
    chunk_overlap_lines: usize,
    chunk_min_chars: usize,
    batch_size: usize,
    skip_embedding_types: Vec<String>,
}

impl EmbeddingService {
    pub fn new(store: Arc<dyn GraphStore>, provider: Box<dyn EmbeddingProvider>, config: &Config) -> Self {
        Self {
            store,
            provider: Arc::from(provider),
            chunk_max_chars: config.chunk_max_chars,
            chunk_max_lines: config.chunk_max_lines,
            chunk_overlap_lines: config.chunk_overlap_lines,
            chunk_min_chars: config.chunk_min_chars,
            batch_size: config.embedding_batch_size,
            skip_embedding_types: Vec::new(),
        }
    }

    /// Construct from an already-shared provider, so a caller that needs a
    /// fresh service per pass (to pick up an updated skip set) doesn't pay
    /// for reconnecting the provider each time.
    pub fn with_shared_provider(store: Arc<dyn GraphStore>, provider: Arc<dyn EmbeddingProvider>, config: &Config) -> Self {
        Self {
            store,
            provider,
            chunk_max_chars: config.chunk_max_chars,
            chunk_max_lines: config.chunk_max_lines,
            chunk_overlap_lines: config.chunk_overlap_lines,
            chunk_min_chars: config.chunk_min_chars,
            batch_size: config.embedding_batch_size,
            skip_embedding_types: Vec::new(),
        }
    }

    /// Entity sub-types fetched from the extraction service's `/config`
    /// (`ServiceConfig::skip_embedding_types`) that should never be sent
    /// to the embedding provider.
    pub fn with_skip_embedding_types(mut self, types: Vec<String>) -> Self {
        self.skip_embedding_types = types;
        self
    }

    /// Process one batch of nodes already in the `embedding` state.
    pub async fn embed_nodes(&self, nodes: Vec<NodeRecord>) -> Result<EmbeddingReport> {
        let mut report = EmbeddingReport::default();
        let mut pending: Vec<PendingView> = Vec::new();
        let mut new_chunk_nodes: Vec<NodeRecord> = Vec::new();
        let mut new_chunk_edges: Vec<EdgeRecord> = Vec::new();
        let mut ready_uuids: Vec<String> = Vec::new();
        let mut parent_updates: HashMap<String, NodeRecord> = HashMap::new();
        let mut cleanup_targets: Vec<String> = Vec::new();

        for node in &nodes {
            if is_skip_embedding_entity(node, &self.skip_embedding_types) {
                ready_uuids.push(node.uuid.clone());
                continue;
            }

            let mut chunked_this_pass = false;

            for view in views_for_labels(&node.labels) {
                let text = match node.properties.get(view.property).and_then(|v| v.as_str()) {
                    Some(t) => t.to_string(),
                    None => continue,
                };

                if text.trim().chars().count() < self.chunk_min_chars {
                    // Phase 1, last rule: too short to be worth embedding,
                    // but the node still advances to `ready`.
                    report.views_skipped_unchanged += 1;
                    continue;
                }

                if view.chunkable
                    && (text.len() > self.chunk_max_chars || text.lines().count() > self.chunk_max_lines)
                {
                    chunked_this_pass = true;
                    let start_line = node
                        .properties
                        .get("startLine")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(1) as usize;
                    let spans = chunk_text(
                        &text,
                        start_line,
                        self.chunk_max_chars,
                        self.chunk_max_lines,
                        self.chunk_overlap_lines,
                        self.chunk_min_chars,
                    );
                    let mut parent = node.clone();
                    parent.uses_chunks = true;
                    parent.chunk_count = spans.len() as u32;
                    parent.embedding_hashes.remove(view.name);
                    parent_updates.insert(parent.uuid.clone(), parent);

                    for span in &spans {
                        let chunk_hash = hash16(span.content.as_bytes());
                        let existing_unchanged = node
                            .embedding_hashes
                            .get(&format!("chunk:{}", span.index))
                            .map(|h| h == &chunk_hash)
                            .unwrap_or(false);
                        if existing_unchanged {
                            report.views_skipped_unchanged += 1;
                            continue;
                        }
                        let uuid = chunk_uuid(&node.uuid, span.index);
                        let mut props = HashMap::new();
                        props.insert("_content".to_string(), serde_json::json!(span.content));
                        props.insert("startLine".to_string(), serde_json::json!(span.start_line));
                        props.insert("endLine".to_string(), serde_json::json!(span.end_line));
                        props.insert("chunkIndex".to_string(), serde_json::json!(span.index));
                        new_chunk_nodes.push(NodeRecord {
                            uuid: uuid.clone(),
                            project_id: node.project_id.clone(),
                            labels: vec![LABEL_EMBEDDING_CHUNK.to_string()],
                            file_uuid: node.file_uuid.clone(),
                            properties: props,
                            state: NodeState::Embedding,
                            state_changed_at: 0,
                            embedding_hashes: HashMap::new(),
                            embedding_provider: None,
                            embedding_model: None,
                            uses_chunks: false,
                            chunk_count: 0,
                            entities_content_hash: None,
                        });
                        new_chunk_edges.push(EdgeRecord {
                            from: node.uuid.clone(),
                            to: uuid.clone(),
                            edge_type: EDGE_HAS_EMBEDDING_CHUNK.to_string(),
                            properties: HashMap::new(),
                        });
                        pending.push(PendingView {
                            target_uuid: uuid,
                            view_name: "content".to_string(),
                            text: span.content.clone(),
                        });
                        report.chunks_created += 1;
                    }
                    continue;
                }

                if view.chunkable && node.uses_chunks {
                    // Content used to need chunking and now fits inline:
                    // the prior EmbeddingChunk children are stale.
                    cleanup_targets.push(node.uuid.clone());
                }

                let text_hash = hash16(text.as_bytes());
                let unchanged = node
                    .embedding_hashes
                    .get(view.name)
                    .map(|h| h == &text_hash)
                    .unwrap_or(false)
                    && node.embedding_provider.as_deref() == Some(self.provider.name())
                    && node.embedding_model.as_deref() == Some(self.provider.model());
                if unchanged {
                    report.views_skipped_unchanged += 1;
                    continue;
                }

                pending.push(PendingView {
                    target_uuid: node.uuid.clone(),
                    view_name: view.name.to_string(),
                    text,
                });
            }

            if !chunked_this_pass && node.uses_chunks {
                // The content view vanished entirely (no text at all) but
                // the node still carries chunk children from a prior pass.
                cleanup_targets.push(node.uuid.clone());
            }

            ready_uuids.push(node.uuid.clone());
        }

        // Phase 2 (spec.md §4.7): chunk cleanup must complete before any
        // new chunk is written, even when this batch has no new chunks.
        cleanup_targets.sort();
        cleanup_targets.dedup();
        for parent_uuid in &cleanup_targets {
            let stale_edges = self.store.get_outbound_edges(parent_uuid, EDGE_HAS_EMBEDDING_CHUNK).await?;
            let stale_uuids: Vec<String> = stale_edges.iter().map(|e| e.to.clone()).collect();
            if !stale_uuids.is_empty() {
                self.store.delete_nodes(&stale_uuids).await?;
            }
            self.store.prune_outbound_edges(parent_uuid, EDGE_HAS_EMBEDDING_CHUNK, &[]).await?;
            let parent = parent_updates.remove(parent_uuid).or_else(|| {
                nodes.iter().find(|n| &n.uuid == parent_uuid).cloned()
            });
            if let Some(mut parent) = parent {
                parent.uses_chunks = false;
                parent.chunk_count = 0;
                parent_updates.insert(parent.uuid.clone(), parent);
            }
        }

        if !parent_updates.is_empty() {
            self.store.upsert_nodes(parent_updates.into_values().collect()).await?;
        }

        if !new_chunk_nodes.is_empty() {
            self.store.upsert_nodes(new_chunk_nodes).await?;
            self.store.upsert_edges(new_chunk_edges).await?;
            self.store
                .ensure_vector_index(LABEL_EMBEDDING_CHUNK, "content", self.provider.dimensions())
                .await?;
        }

        for label in ["Scope", "MarkdownDocument", "MarkdownSection", "DocumentFile", "Entity"] {
            self.store.ensure_vector_index(label, "name", self.provider.dimensions()).await?;
        }
        self.store
            .ensure_vector_index("Entity", "description", self.provider.dimensions())
            .await?;
        self.store
            .ensure_vector_index("MarkdownSection", "content", self.provider.dimensions())
            .await?;

        let tasks: Vec<EmbedTask> = pending
            .iter()
            .map(|p| EmbedTask {
                id: format!("{}\u{0}{}", p.target_uuid, p.view_name),
                text: p.text.clone(),
            })
            .collect();
        let embedded = embed_tasks(self.provider.as_ref(), &tasks, self.batch_size, None).await?;
        report.api_calls += embedded.api_calls;

        for item in &pending {
            let key = format!("{}\u{0}{}", item.target_uuid, item.view_name);
            if let Some(vector) = embedded.vectors.get(&key) {
                let hash = hash16(item.text.as_bytes());
                self.store
                    .set_embedding(
                        &item.target_uuid,
                        &item.view_name,
                        vector.clone(),
                        hash,
                        self.provider.name().to_string(),
                        self.provider.model().to_string(),
                    )
                    .await?;
                report.views_embedded += 1;
            }
        }

        if !ready_uuids.is_empty() {
            self.store.transition_nodes_batch(&ready_uuids, NodeState::Ready).await?;
            report.nodes_embedded = ready_uuids.len();
        }

        Ok(report)
    }
}
