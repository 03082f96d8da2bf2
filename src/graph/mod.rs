pub mod model;
pub mod store;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
pub use model::{
    EdgeRecord, ErrorCause, FileRecord, FileState, NodeRecord, NodeState, TransitionOptions,
};

/// A single `markDiscoveredBatch` input entry (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct DiscoveredEntry {
    pub relative_path: String,
    pub absolute_path: Option<String>,
    pub raw_content_hash: String,
    pub raw_content: Option<String>,
    pub is_virtual: bool,
}

/// Outcome of `markDiscoveredBatch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkDiscoveredReport {
    pub created: Vec<String>,
    pub reset: Vec<String>,
    pub skipped: Vec<String>,
}

/// Contract for the graph store (spec.md §6.3): parameterised batch
/// query/upsert plus vector-index management. Exactly one implementation
/// ships with this crate (`store::EmbeddedGraphStore`, an mmap-backed
/// embedded store) so the pipeline is runnable standalone; a networked
/// backend can implement the same trait without touching the processor.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn mark_discovered_batch(
        &self,
        project_id: &str,
        entries: Vec<DiscoveredEntry>,
    ) -> Result<MarkDiscoveredReport>;

    async fn transition_file(
        &self,
        uuid: &str,
        target: FileState,
        options: TransitionOptions,
    ) -> Result<()>;

    async fn transition_files_batch(&self, uuids: &[String], target: FileState) -> Result<()>;

    async fn get_files_in_state(&self, project_id: &str, state: FileState) -> Result<Vec<FileRecord>>;

    async fn get_retryable_files(&self, project_id: &str, max_retries: u32) -> Result<Vec<FileRecord>>;

    async fn get_state_stats(&self, project_id: &str) -> Result<HashMap<FileState, usize>>;

    async fn get_file(&self, uuid: &str) -> Result<Option<FileRecord>>;

    /// Update `contentHash` on a file; called only after a successful
    /// parse (see resolved Open Question 1 in SPEC_FULL.md §4).
    async fn set_file_content_hash(&self, uuid: &str, content_hash: &str) -> Result<()>;

    async fn delete_file_cascade(&self, uuid: &str) -> Result<()>;

    async fn upsert_nodes(&self, nodes: Vec<NodeRecord>) -> Result<()>;

    async fn get_nodes_by_file(&self, file_uuid: &str) -> Result<Vec<NodeRecord>>;

    async fn get_node(&self, uuid: &str) -> Result<Option<NodeRecord>>;

    async fn get_nodes_in_state(&self, project_id: &str, state: NodeState) -> Result<Vec<NodeRecord>>;

    async fn get_nodes_in_state_for_label(
        &self,
        project_id: &str,
        label: &str,
        state: NodeState,
    ) -> Result<Vec<NodeRecord>>;

    async fn transition_node(&self, uuid: &str, target: NodeState) -> Result<()>;

    async fn transition_nodes_batch(&self, uuids: &[String], target: NodeState) -> Result<()>;

    async fn delete_nodes(&self, uuids: &[String]) -> Result<()>;

    async fn upsert_edges(&self, edges: Vec<EdgeRecord>) -> Result<()>;

    async fn get_outbound_edges(&self, from: &str, edge_type: &str) -> Result<Vec<EdgeRecord>>;

    /// Delete outbound edges of `edge_type` from `from` whose target is
    /// not in `keep_targets`; returns the deleted edges.
    async fn prune_outbound_edges(
        &self,
        from: &str,
        edge_type: &str,
        keep_targets: &[String],
    ) -> Result<Vec<EdgeRecord>>;

    async fn get_pending_imports(&self, project_id: &str) -> Result<Vec<EdgeRecord>>;

    async fn replace_pending_import(
        &self,
        pending: &EdgeRecord,
        resolved_edge_type: &str,
        resolved_to: &str,
    ) -> Result<()>;

    async fn find_nodes_by_name(&self, project_id: &str, name: &str) -> Result<Vec<NodeRecord>>;

    /// Delete every Entity node with zero inbound MENTIONS; returns the
    /// deleted uuids.
    async fn delete_orphan_entities(&self, project_id: &str) -> Result<Vec<String>>;

    async fn ensure_vector_index(&self, label: &str, property: &str, dimension: usize) -> Result<()>;

    async fn set_embedding(
        &self,
        node_uuid: &str,
        view: &str,
        vector: Vec<f32>,
        hash: String,
        provider: String,
        model: String,
    ) -> Result<()>;

    async fn save(&self) -> Result<()>;
}
