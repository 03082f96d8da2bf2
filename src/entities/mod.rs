pub mod client;
pub mod domains;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::content::hash16;
use crate::error::Result;
use crate::graph::model::{
    EdgeRecord, NodeRecord, NodeState, EDGE_MENTIONS, EDGE_RELATED_TO, LABEL_ENTITY,
};
use crate::graph::GraphStore;
use crate::ids::entity_uuid;

use client::{EntityServiceClient, ExtractResult};
use domains::{combo_key, merged_types_for_combo};

/// Document-variant labels eligible for entity extraction. Scope and
/// CodeBlock are excluded (spec.md §4.8: "their value is in their
/// references, not NER").
pub const ENTITY_ELIGIBLE_LABELS: &[&str] = &["MarkdownDocument", "MarkdownSection", "DocumentFile"];

fn current_node_hash(node: &NodeRecord) -> String {
    let name = node.properties.get("_name").and_then(|v| v.as_str()).unwrap_or("");
    let content = node.properties.get("_content").and_then(|v| v.as_str()).unwrap_or("");
    hash16(format!("{name}\u{0}{content}").as_bytes())
}

fn node_text(node: &NodeRecord) -> String {
    node.properties
        .get("_content")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default)]
pub struct EntityExtractionReport {
    /// True if the extraction service was unreachable; the phase was
    /// skipped entirely and embedding may still proceed.
    pub skipped_unavailable: bool,
    pub nodes_processed: usize,
    pub entities_created: usize,
    pub mentions_created: usize,
    pub relations_created: usize,
}

/// Build the Entity nodes and MENTIONS edges a single node's extraction
/// result implies, filtering out entities below `confidence_threshold`.
/// Pure and HTTP-free so the merge/confidence-filter logic is directly
/// testable.
pub fn build_entity_updates(
    project_id: &str,
    source_uuid: &str,
    result: &ExtractResult,
    confidence_threshold: f32,
) -> (Vec<NodeRecord>, Vec<EdgeRecord>, HashMap<String, String>) {
    let mut entities = Vec::new();
    let mut mentions = Vec::new();
    let mut name_to_uuid = HashMap::new();

    for entity in &result.entities {
        if entity.confidence < confidence_threshold {
            continue;
        }
        let uuid = entity_uuid(&entity.entity_type, &entity.name);
        name_to_uuid.insert(entity.name.clone(), uuid.clone());

        let mut properties = HashMap::new();
        properties.insert("_name".to_string(), serde_json::json!(entity.name));
        properties.insert("_content".to_string(), serde_json::json!(entity.name));
        properties.insert("description".to_string(), serde_json::json!(entity.entity_type));
        properties.insert("entityType".to_string(), serde_json::json!(entity.entity_type));
        properties.insert("confidence".to_string(), serde_json::json!(entity.confidence));

        entities.push(NodeRecord {
            uuid: uuid.clone(),
            project_id: project_id.to_string(),
            labels: vec![LABEL_ENTITY.to_string()],
            file_uuid: None,
            properties,
            state: NodeState::Linked,
            state_changed_at: 0,
            embedding_hashes: HashMap::new(),
            embedding_provider: None,
            embedding_model: None,
            uses_chunks: false,
            chunk_count: 0,
            entities_content_hash: None,
        });

        let mut edge_props = HashMap::new();
        edge_props.insert("confidence".to_string(), serde_json::json!(entity.confidence));
        mentions.push(EdgeRecord {
            from: source_uuid.to_string(),
            to: uuid,
            edge_type: EDGE_MENTIONS.to_string(),
            properties: edge_props,
        });
    }

    (entities, mentions, name_to_uuid)
}

/// Build `RELATED_TO` edges between entities extracted in the same node,
/// keeping the higher confidence when the same subject/predicate/object
/// triple is produced more than once (spec.md §4.8 step 8).
pub fn build_relation_edges(
    result: &ExtractResult,
    name_to_uuid: &HashMap<String, String>,
) -> Vec<EdgeRecord> {
    let mut best: HashMap<(String, String, String), f32> = HashMap::new();
    for relation in &result.relations {
        let (Some(subject), Some(object)) =
            (name_to_uuid.get(&relation.subject), name_to_uuid.get(&relation.object))
        else {
            continue;
        };
        let key = (subject.clone(), relation.predicate.clone(), object.clone());
        let entry = best.entry(key).or_insert(relation.confidence);
        if relation.confidence > *entry {
            *entry = relation.confidence;
        }
    }
    best.into_iter()
        .map(|((from, predicate, to), confidence)| {
            let mut properties = HashMap::new();
            properties.insert("predicate".to_string(), serde_json::json!(predicate));
            properties.insert("confidence".to_string(), serde_json::json!(confidence));
            EdgeRecord {
                from,
                to,
                edge_type: EDGE_RELATED_TO.to_string(),
                properties,
            }
        })
        .collect()
}

/// Drives entity extraction (spec.md §4.8, C8): classify each candidate
/// file's domain, group nodes by combo key, extract in batches capped at
/// `batch_node_cap`, write entities/mentions, prune stale mentions, and
/// delete orphaned Entity nodes. Holds the accelerator from `loadModel`
/// until `unloadModel`; callers must not start the embedding phase until
/// `run` returns.
pub struct EntityExtractionCoordinator {
    store: Arc<dyn GraphStore>,
    client: EntityServiceClient,
    confidence_threshold: f32,
    classify_sample_chars: usize,
    batch_node_cap: usize,
}

impl EntityExtractionCoordinator {
    pub fn new(
        store: Arc<dyn GraphStore>,
        endpoint: String,
        confidence_threshold: f32,
        classify_sample_chars: usize,
        batch_node_cap: usize,
    ) -> Result<Self> {
        Ok(Self {
            store,
            client: EntityServiceClient::new(endpoint)?,
            confidence_threshold,
            classify_sample_chars,
            batch_node_cap: batch_node_cap.max(1),
        })
    }

    /// The underlying HTTP client, exposed so callers outside the
    /// extraction phase (the embedding phase, via the processor) can read
    /// service-wide config such as `skip_embedding_types`.
    pub fn client(&self) -> &EntityServiceClient {
        &self.client
    }

    pub async fn run(&self, project_id: &str) -> Result<EntityExtractionReport> {
        if self.client.health().await.is_err() {
            warn!(project_id, "entity extraction service unreachable, skipping phase");
            return Ok(EntityExtractionReport {
                skipped_unavailable: true,
                ..Default::default()
            });
        }

        self.client.load_model().await?;
        let result = self.run_inner(project_id).await;
        // unload regardless of inner success so the accelerator is freed
        // for the embedding phase that follows.
        let _ = self.client.unload_model().await;
        result
    }

    async fn run_inner(&self, project_id: &str) -> Result<EntityExtractionReport> {
        let mut report = EntityExtractionReport::default();

        let mut candidates = Vec::new();
        for label in ENTITY_ELIGIBLE_LABELS {
            let nodes = self
                .store
                .get_nodes_in_state_for_label(project_id, label, NodeState::Entities)
                .await?;
            for node in nodes {
                let current = current_node_hash(&node);
                if node.entities_content_hash.as_deref() != Some(current.as_str()) {
                    candidates.push(node);
                }
            }
        }

        if candidates.is_empty() {
            return Ok(report);
        }

        let mut by_file: HashMap<String, Vec<NodeRecord>> = HashMap::new();
        for node in candidates {
            by_file.entry(node.file_uuid.clone().unwrap_or_default()).or_default().push(node);
        }

        let file_uuids: Vec<String> = by_file.keys().cloned().collect();
        let mut samples = Vec::with_capacity(file_uuids.len());
        for file_uuid in &file_uuids {
            let text = match self.store.get_file(file_uuid).await? {
                Some(file) => file.raw_content.unwrap_or_default(),
                None => String::new(),
            };
            let sample: String = text.chars().take(self.classify_sample_chars).collect();
            samples.push(sample);
        }

        let combos: Vec<String> = match self.client.classify_batch(&samples).await {
            Ok(classifications) => classifications
                .iter()
                .map(|labels| {
                    let names: Vec<String> = labels.iter().map(|c| c.label.clone()).collect();
                    combo_key(&names)
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "classify_batch failed, falling back to default domain for all files");
                file_uuids.iter().map(|_| domains::DEFAULT_COMBO.to_string()).collect()
            }
        };

        let mut nodes_by_combo: HashMap<String, Vec<NodeRecord>> = HashMap::new();
        for (file_uuid, combo) in file_uuids.iter().zip(combos) {
            if let Some(nodes) = by_file.remove(file_uuid) {
                nodes_by_combo.entry(combo).or_default().extend(nodes);
            }
        }

        let presets = self.client.presets().await.unwrap_or_default();

        for (combo, nodes) in nodes_by_combo {
            let Some((entity_types, relation_types)) = merged_types_for_combo(&combo, &presets) else {
                self.mark_processed(project_id, &nodes).await?;
                continue;
            };

            for batch in nodes.chunks(self.batch_node_cap) {
                let texts: Vec<String> = batch.iter().map(node_text).collect();
                let results = self.client.extract_batch(&texts, &entity_types, &relation_types).await?;

                for (node, result) in batch.iter().zip(&results) {
                    self.apply_result(project_id, node, result, &mut report).await?;
                }
                self.mark_processed(project_id, batch).await?;
                report.nodes_processed += batch.len();
            }
        }

        let deleted = self.store.delete_orphan_entities(project_id).await?;
        info!(project_id, deleted = deleted.len(), "pruned orphaned entities");

        Ok(report)
    }

    async fn apply_result(
        &self,
        project_id: &str,
        node: &NodeRecord,
        result: &ExtractResult,
        report: &mut EntityExtractionReport,
    ) -> Result<()> {
        let (entities, mentions, name_to_uuid) =
            build_entity_updates(project_id, &node.uuid, result, self.confidence_threshold);
        let relations = build_relation_edges(result, &name_to_uuid);

        if !entities.is_empty() {
            self.store.upsert_nodes(entities.clone()).await?;
        }
        if !mentions.is_empty() {
            self.store.upsert_edges(mentions.clone()).await?;
        }
        if !relations.is_empty() {
            self.store.upsert_edges(relations.clone()).await?;
        }

        let keep_targets: Vec<String> = mentions.iter().map(|e| e.to.clone()).collect();
        self.store.prune_outbound_edges(&node.uuid, EDGE_MENTIONS, &keep_targets).await?;

        report.entities_created += entities.len();
        report.mentions_created += mentions.len();
        report.relations_created += relations.len();
        Ok(())
    }

    async fn mark_processed(&self, _project_id: &str, nodes: &[NodeRecord]) -> Result<()> {
        let mut updated = Vec::with_capacity(nodes.len());
        for node in nodes {
            let hash = current_node_hash(node);
            let mut node = node.clone();
            node.entities_content_hash = Some(hash);
            updated.push(node);
        }
        self.store.upsert_nodes(updated).await
    }
}
