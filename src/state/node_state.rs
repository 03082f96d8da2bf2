use std::sync::Arc;

use crate::error::Result;
use crate::graph::{GraphStore, NodeRecord, NodeState};

/// Per-node lifecycle contract (spec.md §4.3). Shares the state vocabulary
/// with [`crate::state::FileStateMachine`] but advances independently: a
/// file can reach `embedded` while some of its nodes remain `linked` (e.g.
/// skip-embedding entity subtypes). Driven by the embedding and entity
/// phases, never by file transitions directly.
#[derive(Clone)]
pub struct NodeStateMachine {
    store: Arc<dyn GraphStore>,
}

impl NodeStateMachine {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub async fn upsert(&self, nodes: Vec<NodeRecord>) -> Result<()> {
        self.store.upsert_nodes(nodes).await
    }

    pub async fn get_nodes_by_file(&self, file_uuid: &str) -> Result<Vec<NodeRecord>> {
        self.store.get_nodes_by_file(file_uuid).await
    }

    pub async fn get_in_state(&self, project_id: &str, state: NodeState) -> Result<Vec<NodeRecord>> {
        self.store.get_nodes_in_state(project_id, state).await
    }

    pub async fn get_in_state_for_label(
        &self,
        project_id: &str,
        label: &str,
        state: NodeState,
    ) -> Result<Vec<NodeRecord>> {
        self.store
            .get_nodes_in_state_for_label(project_id, label, state)
            .await
    }

    pub async fn transition(&self, uuid: &str, target: NodeState) -> Result<()> {
        self.store.transition_node(uuid, target).await
    }

    pub async fn transition_batch(&self, uuids: &[String], target: NodeState) -> Result<()> {
        self.store.transition_nodes_batch(uuids, target).await
    }

    pub async fn delete(&self, uuids: &[String]) -> Result<()> {
        self.store.delete_nodes(uuids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::EmbeddedGraphStore;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn node(uuid: &str, label: &str, state: NodeState) -> NodeRecord {
        NodeRecord {
            uuid: uuid.into(),
            project_id: "p".into(),
            labels: vec![label.into()],
            file_uuid: Some("file:1".into()),
            properties: HashMap::new(),
            state,
            state_changed_at: 0,
            embedding_hashes: HashMap::new(),
            embedding_provider: None,
            embedding_model: None,
            uses_chunks: false,
            chunk_count: 0,
            entities_content_hash: None,
        }
    }

    #[tokio::test]
    async fn transition_rejects_skip_from_linked_to_ready() {
        let dir = TempDir::new().unwrap();
        let store = EmbeddedGraphStore::create(&dir.path().join("s.bin")).unwrap();
        let nsm = NodeStateMachine::new(Arc::new(store));
        nsm.upsert(vec![node("scope:1", "Scope", NodeState::Linked)])
            .await
            .unwrap();
        let err = nsm.transition("scope:1", NodeState::Ready).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn linked_to_embedding_allowed_for_skip_embedding_entities() {
        let dir = TempDir::new().unwrap();
        let store = EmbeddedGraphStore::create(&dir.path().join("s.bin")).unwrap();
        let nsm = NodeStateMachine::new(Arc::new(store));
        nsm.upsert(vec![node("entity:1", "Entity", NodeState::Linked)])
            .await
            .unwrap();
        nsm.transition("entity:1", NodeState::Embedding).await.unwrap();
        nsm.transition("entity:1", NodeState::Ready).await.unwrap();
    }
}
