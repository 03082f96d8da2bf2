use std::collections::HashMap;

use crate::graph::{NodeRecord, NodeState};

/// Identity-stable fields snapshotted before a reparse and restored after,
/// so content that is semantically unchanged does not lose its embeddings
/// or entity annotations (spec.md §4.4, C4).
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub state: NodeState,
    pub embedding_hashes: HashMap<String, String>,
    pub embedding_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub uses_chunks: bool,
    pub chunk_count: u32,
    pub entities_content_hash: Option<String>,
    embedding_vectors: HashMap<String, serde_json::Value>,
}

/// Snapshots and restores node metadata across a reparse. Stateless: keyed
/// snapshots are passed explicitly between `snapshot` and `restore` calls
/// rather than held as module-level cache (spec.md §9, no hidden singletons).
pub struct MetadataPreserver;

impl MetadataPreserver {
    /// Snapshot every existing node's identity-stable fields keyed by uuid.
    /// Uuid doubles as the node's business identity since Scope/Entity uuids
    /// are themselves pure functions of business fields (spec.md §3.3
    /// invariant 6), so a uuid match after reparse means "same business
    /// identity".
    pub fn snapshot(existing: &[NodeRecord]) -> HashMap<String, NodeSnapshot> {
        existing
            .iter()
            .map(|node| {
                let embedding_vectors = node
                    .properties
                    .iter()
                    .filter(|(k, _)| k.starts_with("embedding_") && !k.ends_with("_hash"))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                (
                    node.uuid.clone(),
                    NodeSnapshot {
                        state: node.state,
                        embedding_hashes: node.embedding_hashes.clone(),
                        embedding_provider: node.embedding_provider.clone(),
                        embedding_model: node.embedding_model.clone(),
                        uses_chunks: node.uses_chunks,
                        chunk_count: node.chunk_count,
                        entities_content_hash: node.entities_content_hash.clone(),
                        embedding_vectors,
                    },
                )
            })
            .collect()
    }

    /// Restore snapshots onto freshly-upserted nodes by uuid match. Nodes
    /// with no matching snapshot (genuinely new) are left untouched so they
    /// enter the pipeline from `discovered`/`parsed` as normal.
    pub fn restore(new_nodes: &mut [NodeRecord], snapshots: &HashMap<String, NodeSnapshot>) {
        for node in new_nodes.iter_mut() {
            if let Some(snapshot) = snapshots.get(&node.uuid) {
                node.state = snapshot.state;
                node.embedding_hashes = snapshot.embedding_hashes.clone();
                node.embedding_provider = snapshot.embedding_provider.clone();
                node.embedding_model = snapshot.embedding_model.clone();
                node.uses_chunks = snapshot.uses_chunks;
                node.chunk_count = snapshot.chunk_count;
                node.entities_content_hash = snapshot.entities_content_hash.clone();
                for (k, v) in &snapshot.embedding_vectors {
                    node.properties.insert(k.clone(), v.clone());
                }
            }
        }
    }
}
