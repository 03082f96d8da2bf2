use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graph::model::{EDGE_PENDING_IMPORT, RESOLVED_REFERENCE_EDGE_TYPES};
use crate::graph::{EdgeRecord, GraphStore, NodeRecord};
use crate::parser::ParsedRelationship;

const VALUE_CARRYING_KINDS: &[&str] = &["function", "const", "class", "method"];

/// Outcome of resolving one file's parsed relationships.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOutcome {
    pub resolved_immediately: usize,
    pub pending_created: usize,
}

/// Outcome of a full-project `PENDING_IMPORT` sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub resolved: usize,
    pub remaining: usize,
}

/// Converts unresolved symbolic references into graph edges, emitting
/// `PENDING_IMPORT` when the target is not yet known, and sweeping those
/// edges after every full pass (spec.md §4.6, C6).
pub struct RelationshipResolver {
    store: Arc<dyn GraphStore>,
}

impl RelationshipResolver {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Resolve one file's parsed relationships. `id_to_uuid` maps the
    /// parser's caller-local node ids to assigned graph uuids.
    pub async fn resolve_file(
        &self,
        project_id: &str,
        file_uuid: &str,
        id_to_uuid: &HashMap<String, String>,
        relationships: Vec<ParsedRelationship>,
    ) -> Result<ResolveOutcome> {
        let mut outcome = ResolveOutcome::default();
        let mut edges = Vec::new();
        let mut pending = Vec::new();
        // source uuid -> edge_type -> targets emitted this pass, for the
        // CONSUMES-family stale cleanup (resolved Open Question 3).
        let mut emitted: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();

        for rel in relationships {
            let from_uuid = id_to_uuid
                .get(&rel.from)
                .cloned()
                .ok_or_else(|| Error::RelationFailure(format!("unknown local node id '{}'", rel.from)))?;

            // Seed an entry for every source node that emits *any* relationship
            // this pass, resolved or pending, so the stale-edge prune below still
            // runs even when a resolved-type edge count drops to zero on reparse.
            emitted.entry(from_uuid.clone()).or_default();

            match rel.to {
                Some(to_id) => {
                    let to_uuid = id_to_uuid.get(&to_id).cloned().unwrap_or(to_id);
                    if RESOLVED_REFERENCE_EDGE_TYPES.contains(&rel.edge_type.as_str()) {
                        emitted
                            .entry(from_uuid.clone())
                            .or_default()
                            .entry(rel.edge_type.clone())
                            .or_default()
                            .push(to_uuid.clone());
                    }
                    edges.push(EdgeRecord {
                        from: from_uuid,
                        to: to_uuid,
                        edge_type: rel.edge_type,
                        properties: rel.properties,
                    });
                    outcome.resolved_immediately += 1;
                }
                None => {
                    let symbol = rel
                        .target_props
                        .get("symbol")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let candidates = self.store.find_nodes_by_name(project_id, &symbol).await?;
                    let candidates = filter_by_label(candidates, rel.target_label.as_deref());

                    match tie_break(candidates, Some(file_uuid)) {
                        Some(target) => {
                            if RESOLVED_REFERENCE_EDGE_TYPES.contains(&rel.edge_type.as_str()) {
                                emitted
                                    .entry(from_uuid.clone())
                                    .or_default()
                                    .entry(rel.edge_type.clone())
                                    .or_default()
                                    .push(target.uuid.clone());
                            }
                            edges.push(EdgeRecord {
                                from: from_uuid,
                                to: target.uuid,
                                edge_type: rel.edge_type,
                                properties: rel.properties,
                            });
                            outcome.resolved_immediately += 1;
                        }
                        None => {
                            let mut props = rel.properties;
                            props.insert("symbol".into(), serde_json::json!(symbol));
                            props.insert(
                                "fromEdgeType".into(),
                                serde_json::json!(rel.edge_type),
                            );
                            if let Some(label) = &rel.target_label {
                                props.insert("sourceModule".into(), serde_json::json!(label));
                            }
                            pending.push(EdgeRecord {
                                from: from_uuid,
                                to: format!("pending:{symbol}"),
                                edge_type: EDGE_PENDING_IMPORT.to_string(),
                                properties: props,
                            });
                            outcome.pending_created += 1;
                        }
                    }
                }
            }
        }

        if !edges.is_empty() {
            self.store.upsert_edges(edges).await?;
        }
        if !pending.is_empty() {
            self.store.upsert_edges(pending).await?;
        }

        for (from, by_type) in emitted {
            for edge_type in RESOLVED_REFERENCE_EDGE_TYPES {
                let keep = by_type.get(*edge_type).cloned().unwrap_or_default();
                self.store.prune_outbound_edges(&from, edge_type, &keep).await?;
            }
        }

        Ok(outcome)
    }

    /// Run after every full pass over discovered files: replace any
    /// `PENDING_IMPORT` edge whose named target now exists and matches by
    /// file+type with the resolved edge (spec.md §4.6).
    pub async fn sweep_pending_imports(&self, project_id: &str) -> Result<SweepReport> {
        let pending = self.store.get_pending_imports(project_id).await?;
        let mut report = SweepReport::default();

        for edge in pending {
            let symbol = edge
                .properties
                .get("symbol")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let target_label = edge
                .properties
                .get("sourceModule")
                .and_then(|v| v.as_str());
            let resolved_edge_type = edge
                .properties
                .get("fromEdgeType")
                .and_then(|v| v.as_str())
                .unwrap_or("CONSUMES")
                .to_string();

            let candidates = self.store.find_nodes_by_name(project_id, symbol).await?;
            let candidates = filter_by_label(candidates, target_label);

            let from_file = self
                .store
                .get_node(&edge.from)
                .await?
                .and_then(|n| n.file_uuid);

            match tie_break(candidates, from_file.as_deref()) {
                Some(target) => {
                    self.store
                        .replace_pending_import(&edge, &resolved_edge_type, &target.uuid)
                        .await?;
                    report.resolved += 1;
                }
                None => {
                    report.remaining += 1;
                }
            }
        }

        Ok(report)
    }
}

fn filter_by_label(candidates: Vec<NodeRecord>, label: Option<&str>) -> Vec<NodeRecord> {
    match label {
        Some(label) => candidates.into_iter().filter(|c| c.has_label(label)).collect(),
        None => candidates,
    }
}

/// Tie-break among candidates sharing a name: prefer same-file; among
/// value-carrying kinds over type-only kinds; otherwise leave unresolved
/// (spec.md §4.6).
fn tie_break(candidates: Vec<NodeRecord>, from_file_uuid: Option<&str>) -> Option<NodeRecord> {
    if candidates.is_empty() {
        return None;
    }
    if candidates.len() == 1 {
        return candidates.into_iter().next();
    }

    let mut pool = candidates;
    if let Some(file) = from_file_uuid {
        let same_file: Vec<_> = pool
            .iter()
            .filter(|c| c.file_uuid.as_deref() == Some(file))
            .cloned()
            .collect();
        if same_file.len() == 1 {
            return same_file.into_iter().next();
        }
        if !same_file.is_empty() {
            pool = same_file;
        }
    }

    let value_carrying: Vec<_> = pool
        .iter()
        .filter(|c| {
            c.properties
                .get("type")
                .and_then(|v| v.as_str())
                .map(|t| VALUE_CARRYING_KINDS.contains(&t))
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    if value_carrying.len() == 1 {
        return value_carrying.into_iter().next();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::EmbeddedGraphStore;
    use crate::graph::{FileState, NodeState};
    use crate::parser::ParsedRelationship;
    use std::collections::HashMap as Map;
    use tempfile::TempDir;

    fn node(uuid: &str, name: &str, kind: &str, file: &str) -> NodeRecord {
        let mut props = Map::new();
        props.insert("_name".into(), serde_json::json!(name));
        props.insert("type".into(), serde_json::json!(kind));
        NodeRecord {
            uuid: uuid.into(),
            project_id: "p".into(),
            labels: vec!["Scope".into()],
            file_uuid: Some(file.into()),
            properties: props,
            state: NodeState::Linked,
            state_changed_at: 0,
            embedding_hashes: Map::new(),
            embedding_provider: None,
            embedding_model: None,
            uses_chunks: false,
            chunk_count: 0,
            entities_content_hash: None,
        }
    }

    #[tokio::test]
    async fn unresolved_reference_creates_pending_import() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EmbeddedGraphStore::create(&dir.path().join("s.bin")).unwrap());
        let resolver = RelationshipResolver::new(store.clone());

        let mut id_to_uuid = Map::new();
        id_to_uuid.insert("scope_a".to_string(), "scope:a".to_string());
        store
            .upsert_nodes(vec![node("scope:a", "a", "function", "file:a")])
            .await
            .unwrap();

        let rel = ParsedRelationship::unresolved("CONSUMES", "scope_a", "Scope", "foo");
        let outcome = resolver
            .resolve_file("p", "file:a", &id_to_uuid, vec![rel])
            .await
            .unwrap();

        assert_eq!(outcome.pending_created, 1);
        let pending = store.get_pending_imports("p").await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn sweep_resolves_once_target_exists() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EmbeddedGraphStore::create(&dir.path().join("s.bin")).unwrap());
        let resolver = RelationshipResolver::new(store.clone());

        store
            .upsert_nodes(vec![node("scope:a", "a", "function", "file:a")])
            .await
            .unwrap();
        let mut id_to_uuid = Map::new();
        id_to_uuid.insert("scope_a".to_string(), "scope:a".to_string());
        resolver
            .resolve_file(
                "p",
                "file:a",
                &id_to_uuid,
                vec![ParsedRelationship::unresolved("CONSUMES", "scope_a", "Scope", "foo")],
            )
            .await
            .unwrap();

        // now "foo" is defined in file b
        store
            .upsert_nodes(vec![node("scope:foo", "foo", "function", "file:b")])
            .await
            .unwrap();

        let report = resolver.sweep_pending_imports("p").await.unwrap();
        assert_eq!(report.resolved, 1);
        assert_eq!(report.remaining, 0);

        let consumes = store.get_outbound_edges("scope:a", "CONSUMES").await.unwrap();
        assert_eq!(consumes.len(), 1);
        assert_eq!(consumes[0].to, "scope:foo");
    }

    #[tokio::test]
    async fn ambiguous_candidates_without_tiebreak_stay_unresolved() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EmbeddedGraphStore::create(&dir.path().join("s.bin")).unwrap());
        let resolver = RelationshipResolver::new(store.clone());

        store
            .upsert_nodes(vec![
                node("scope:foo1", "foo", "interface", "file:b"),
                node("scope:foo2", "foo", "interface", "file:c"),
            ])
            .await
            .unwrap();
        let mut id_to_uuid = Map::new();
        id_to_uuid.insert("scope_a".to_string(), "scope:a".to_string());
        store
            .upsert_nodes(vec![node("scope:a", "a", "function", "file:a")])
            .await
            .unwrap();
        resolver
            .resolve_file(
                "p",
                "file:a",
                &id_to_uuid,
                vec![ParsedRelationship::unresolved("IMPLEMENTS", "scope_a", "Scope", "foo")],
            )
            .await
            .unwrap();

        let report = resolver.sweep_pending_imports("p").await.unwrap();
        assert_eq!(report.resolved, 0);
        assert_eq!(report.remaining, 1);
    }

    #[tokio::test]
    async fn stale_consumes_edge_is_pruned_when_not_reemitted() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EmbeddedGraphStore::create(&dir.path().join("s.bin")).unwrap());
        let resolver = RelationshipResolver::new(store.clone());

        store
            .upsert_nodes(vec![
                node("scope:a", "a", "function", "file:a"),
                node("scope:old", "old", "function", "file:b"),
                node("scope:new", "new", "function", "file:b"),
            ])
            .await
            .unwrap();

        let mut id_to_uuid = Map::new();
        id_to_uuid.insert("scope_a".to_string(), "scope:a".to_string());

        // first pass references "old"
        resolver
            .resolve_file(
                "p",
                "file:a",
                &id_to_uuid,
                vec![ParsedRelationship::resolved("CONSUMES", "scope_a", "scope:old")],
            )
            .await
            .unwrap();
        assert_eq!(store.get_outbound_edges("scope:a", "CONSUMES").await.unwrap().len(), 1);

        // second pass (reparse) now only references "new"
        resolver
            .resolve_file(
                "p",
                "file:a",
                &id_to_uuid,
                vec![ParsedRelationship::resolved("CONSUMES", "scope_a", "scope:new")],
            )
            .await
            .unwrap();

        let consumes = store.get_outbound_edges("scope:a", "CONSUMES").await.unwrap();
        assert_eq!(consumes.len(), 1);
        assert_eq!(consumes[0].to, "scope:new");
    }
}
