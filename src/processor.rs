use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::content::{hash16, ContentProvider};
use crate::embedding::{create_provider, EmbeddingProvider, EmbeddingService};
use crate::entities::{EntityExtractionCoordinator, ENTITY_ELIGIBLE_LABELS};
use crate::error::Result;
use crate::graph::model::{ErrorCause, TransitionOptions};
use crate::graph::{DiscoveredEntry, FileRecord, FileState, GraphStore, NodeRecord, NodeState};
use crate::ids::{file_uuid, scope_uuid};
use crate::metadata_preserver::MetadataPreserver;
use crate::parser::{ParsedGraph, ParsedNode, ParserDispatcher};
use crate::relations::RelationshipResolver;
use crate::state::{FileStateMachine, NodeStateMachine};

/// Options accepted by [`Processor::ingest_virtual_files`].
#[derive(Debug, Clone, Default)]
pub struct VirtualFileInput {
    pub relative_path: String,
    pub content: String,
    pub additional_properties: HashMap<String, serde_json::Value>,
}

/// Report returned by [`Processor::recover`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RecoverReport {
    pub files_recovered: usize,
    pub files_in_error: usize,
    pub states_reset: usize,
}

/// Report returned by [`Processor::process_discovered`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DiscoveredReport {
    pub files_parsed: usize,
    pub files_errored: usize,
    pub pending_resolved: usize,
    pub pending_remaining: usize,
}

/// Report returned by [`Processor::process_linked`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct LinkedReport {
    pub entities_processed: usize,
    pub entities_created: usize,
    pub nodes_embedded: usize,
    pub chunks_created: usize,
    pub files_embedded: usize,
}

/// Builds the local-id -> parent-local-id map implied by a parsed file's
/// structural edges (`CHILD_OF`, `HAS_SECTION`, `CONTAINS_CODE`), so node
/// uuids can be derived from a stable ancestor breadcrumb instead of the
/// parser's per-parse counters.
fn parent_map(graph: &ParsedGraph) -> HashMap<String, String> {
    let mut parents = HashMap::new();
    for rel in &graph.relationships {
        let Some(to) = rel.to.as_ref() else { continue };
        match rel.edge_type.as_str() {
            "CHILD_OF" => {
                parents.insert(rel.from.clone(), to.clone());
            }
            "HAS_SECTION" | "CONTAINS_CODE" => {
                parents.insert(to.clone(), rel.from.clone());
            }
            _ => {}
        }
    }
    parents
}

fn breadcrumb(
    local_id: &str,
    nodes_by_id: &HashMap<&str, &ParsedNode>,
    parents: &HashMap<String, String>,
) -> String {
    let mut chain = Vec::new();
    let mut current = Some(local_id.to_string());
    let mut hops = 0;
    while let Some(id) = current {
        hops += 1;
        if hops > 128 {
            break; // malformed parent cycle; fall back to what we have
        }
        if let Some(node) = nodes_by_id.get(id.as_str()) {
            let name = node
                .properties
                .get("_name")
                .and_then(|v| v.as_str())
                .unwrap_or(&id);
            chain.push(format!("{}:{name}", node.labels.join(",")));
        }
        current = parents.get(&id).cloned();
    }
    chain.reverse();
    chain.join("/")
}

/// Assigns every parsed node a stable uuid derived from its position in
/// the file's structural hierarchy rather than the parser's local,
/// per-parse counters, so a reparse that doesn't change a node's identity
/// (name, label, ancestor chain) keeps its uuid (spec.md §3.1, §9 "UUID
/// stability"). Siblings that collide on the same breadcrumb (e.g. two
/// same-titled headings under the same parent) are disambiguated by
/// occurrence order.
fn assign_node_uuids(file_uuid: &str, graph: &ParsedGraph) -> HashMap<String, String> {
    let nodes_by_id: HashMap<&str, &ParsedNode> =
        graph.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let parents = parent_map(graph);
    let mut occurrences: HashMap<String, usize> = HashMap::new();
    let mut out = HashMap::new();

    for node in &graph.nodes {
        let crumb = breadcrumb(&node.id, &nodes_by_id, &parents);
        let occurrence = occurrences.entry(crumb.clone()).or_insert(0);
        let disambiguated = if *occurrence == 0 {
            crumb
        } else {
            format!("{crumb}#{occurrence}")
        };
        *occurrence += 1;

        let signature = hash16(disambiguated.as_bytes());
        let label = node.labels.first().map(String::as_str).unwrap_or("node");
        let name = node
            .properties
            .get("_name")
            .and_then(|v| v.as_str())
            .unwrap_or(&node.id);
        out.insert(node.id.clone(), scope_uuid(file_uuid, name, label, &signature));
    }
    out
}

fn parsed_node_to_record(
    project_id: &str,
    file_uuid: &str,
    uuid: String,
    node: &ParsedNode,
) -> NodeRecord {
    NodeRecord {
        uuid,
        project_id: project_id.to_string(),
        labels: node.labels.clone(),
        file_uuid: Some(file_uuid.to_string()),
        properties: node.properties.clone(),
        state: NodeState::Discovered,
        state_changed_at: 0,
        embedding_hashes: HashMap::new(),
        embedding_provider: None,
        embedding_model: None,
        uses_chunks: false,
        chunk_count: 0,
        entities_content_hash: None,
    }
}

/// Drives the end-to-end corpus pipeline (spec.md §4.9, C9): discovery's
/// output through parsing, relationship resolution, entity extraction,
/// and embedding, with crash recovery and a virtual-file ingestion path
/// for callers who don't have the content on disk.
pub struct Processor {
    project_id: String,
    store: Arc<dyn GraphStore>,
    content: Arc<dyn ContentProvider>,
    parsers: ParserDispatcher,
    files: FileStateMachine,
    nodes: NodeStateMachine,
    relations: RelationshipResolver,
    entities: EntityExtractionCoordinator,
    provider: Arc<dyn EmbeddingProvider>,
    config: Config,
}

impl Processor {
    pub fn new(
        project_id: impl Into<String>,
        store: Arc<dyn GraphStore>,
        content: Arc<dyn ContentProvider>,
        config: Config,
    ) -> Result<Self> {
        let provider: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config)?);
        let entities = EntityExtractionCoordinator::new(
            store.clone(),
            config.entity_service_endpoint.clone(),
            config.entity_confidence_threshold,
            config.entity_classify_sample_chars,
            config.entity_batch_node_cap,
        )?;
        Ok(Self {
            project_id: project_id.into(),
            files: FileStateMachine::new(store.clone()),
            nodes: NodeStateMachine::new(store.clone()),
            relations: RelationshipResolver::new(store.clone()),
            entities,
            provider,
            store,
            content,
            parsers: ParserDispatcher::new(),
            config,
        })
    }

    fn embedding_service(&self, skip_embedding_types: Vec<String>) -> EmbeddingService {
        EmbeddingService::with_shared_provider(self.store.clone(), self.provider.clone(), &self.config)
            .with_skip_embedding_types(skip_embedding_types)
    }

    async fn skip_embedding_types(&self) -> Vec<String> {
        match self.entities.client().service_config().await {
            Ok(cfg) => cfg.skip_embedding_types,
            Err(e) => {
                debug!(error = %e, "could not fetch entity service config, no skip-embedding types applied");
                Vec::new()
            }
        }
    }

    /// Snapshot, read, parse, restore, and resolve relationships for every
    /// `discovered` file, then transition each through to `linked` (or
    /// `error`) as one batched pass, followed by a full-project
    /// `PENDING_IMPORT` sweep (spec.md §4.9 step 1).
    pub async fn process_discovered(&self) -> Result<DiscoveredReport> {
        let files = self.files.get_files_in_state(&self.project_id, FileState::Discovered).await?;
        let mut report = DiscoveredReport::default();

        let limit = self.config.concurrency_limit.max(1);
        let results: Vec<Result<()>> = stream::iter(files)
            .map(|file| self.process_one_discovered(file))
            .buffer_unordered(limit)
            .collect()
            .await;

        for result in results {
            match result {
                Ok(()) => report.files_parsed += 1,
                Err(e) => {
                    warn!(error = %e, "file failed during discovered processing");
                    report.files_errored += 1;
                }
            }
        }

        let sweep = self.relations.sweep_pending_imports(&self.project_id).await?;
        report.pending_resolved = sweep.resolved;
        report.pending_remaining = sweep.remaining;
        Ok(report)
    }

    async fn process_one_discovered(&self, file: FileRecord) -> Result<()> {
        if let Err(e) = self.files.transition(&file.uuid, FileState::Parsing, TransitionOptions::default()).await {
            warn!(file = %file.relative_path, error = %e, "could not transition to parsing");
            return Err(e);
        }

        match self.parse_and_link_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let options = TransitionOptions {
                    error_type: Some(ErrorCause::Parse),
                    error_message: Some(e.to_string()),
                };
                let _ = self.files.transition(&file.uuid, FileState::Error, options).await;
                Err(e)
            }
        }
    }

    async fn parse_and_link_file(&self, file: &FileRecord) -> Result<()> {
        let bytes = self.content.read(file).await?;
        let path = std::path::Path::new(&file.relative_path);
        let parsed = self.parsers.dispatch(path, &bytes)?;

        let id_to_uuid = assign_node_uuids(&file.uuid, &parsed);
        let existing = self.store.get_nodes_by_file(&file.uuid).await?;
        let snapshots = MetadataPreserver::snapshot(&existing);

        let mut new_nodes: Vec<NodeRecord> = parsed
            .nodes
            .iter()
            .map(|n| {
                let uuid = id_to_uuid.get(&n.id).cloned().expect("every node id is assigned a uuid");
                parsed_node_to_record(&self.project_id, &file.uuid, uuid, n)
            })
            .collect();
        MetadataPreserver::restore(&mut new_nodes, &snapshots);

        let stale: Vec<String> = existing
            .iter()
            .map(|n| n.uuid.clone())
            .filter(|uuid| !id_to_uuid.values().any(|v| v == uuid))
            .collect();
        if !stale.is_empty() {
            self.nodes.delete(&stale).await?;
        }

        self.nodes.upsert(new_nodes).await?;
        self.store.set_file_content_hash(&file.uuid, &hash16(&bytes)).await?;
        self.files.transition(&file.uuid, FileState::Parsed, TransitionOptions::default()).await?;

        let outcome = self
            .relations
            .resolve_file(&self.project_id, &file.uuid, &id_to_uuid, parsed.relationships)
            .await?;
        debug!(
            file = %file.relative_path,
            resolved = outcome.resolved_immediately,
            pending = outcome.pending_created,
            "resolved file relationships"
        );

        self.files.transition(&file.uuid, FileState::Relations, TransitionOptions::default()).await?;
        let node_uuids: Vec<String> = id_to_uuid.values().cloned().collect();
        self.nodes.transition_batch(&node_uuids, NodeState::Linked).await?;
        self.files.transition(&file.uuid, FileState::Linked, TransitionOptions::default()).await?;
        Ok(())
    }

    /// Runs the entity extraction phase to completion, then the embedding
    /// phase, in that fixed order (spec.md §4.9 step 2, §5: embedding must
    /// not start until `unloadModel` returns). Transitions `linked` files
    /// through to `embedded`.
    pub async fn process_linked(&self) -> Result<LinkedReport> {
        let mut report = LinkedReport::default();

        let files = self.files.get_files_in_state(&self.project_id, FileState::Linked).await?;
        for file in &files {
            self.files.transition(&file.uuid, FileState::Entities, TransitionOptions::default()).await?;
        }

        self.advance_linked_nodes().await?;

        let entity_report = self.entities.run(&self.project_id).await?;
        report.entities_processed = entity_report.nodes_processed;
        report.entities_created = entity_report.entities_created;

        // Entity nodes minted by the run above land in `linked`; sweep them
        // (and anything else still waiting) straight to `embedding`, then
        // move the document nodes the coordinator actually processed out of
        // `entities`.
        self.advance_linked_nodes().await?;
        self.advance_entities_to_embedding().await?;

        let skip_types = self.skip_embedding_types().await;
        let service = self.embedding_service(skip_types);

        for file in &files {
            self.files.transition(&file.uuid, FileState::Embedding, TransitionOptions::default()).await?;

            let nodes = self.nodes.get_nodes_by_file(&file.uuid).await?;
            let in_embedding: Vec<NodeRecord> = nodes
                .into_iter()
                .filter(|n| n.state == NodeState::Embedding)
                .collect();

            match service.embed_nodes(in_embedding).await {
                Ok(embed_report) => {
                    report.nodes_embedded += embed_report.nodes_embedded;
                    report.chunks_created += embed_report.chunks_created;
                    let options = TransitionOptions::default();
                    self.files.transition(&file.uuid, FileState::Embedded, options).await?;
                    report.files_embedded += 1;
                }
                Err(e) => {
                    warn!(file = %file.relative_path, error = %e, "embedding failed for file");
                    let options = TransitionOptions {
                        error_type: Some(ErrorCause::Embed),
                        error_message: Some(e.to_string()),
                    };
                    self.files.transition(&file.uuid, FileState::Error, options).await?;
                }
            }
        }

        // Entity nodes carry no file_uuid, so the per-file loop above never
        // sees them; embed whatever project-wide Entity nodes are now
        // waiting in `embedding` separately.
        let entity_nodes = self
            .nodes
            .get_in_state_for_label(&self.project_id, crate::graph::model::LABEL_ENTITY, NodeState::Embedding)
            .await?;
        if !entity_nodes.is_empty() {
            let embed_report = service.embed_nodes(entity_nodes).await?;
            report.nodes_embedded += embed_report.nodes_embedded;
            report.chunks_created += embed_report.chunks_created;
        }

        info!(
            files_embedded = report.files_embedded,
            nodes_embedded = report.nodes_embedded,
            entities_created = report.entities_created,
            "linked-phase processing complete"
        );
        Ok(report)
    }

    /// Embeds every node currently in `embedding` state project-wide,
    /// without touching any file's state — used by the watcher-driven
    /// incremental path where a reparse may leave some nodes of an
    /// already-`embedded` file back in `embedding` (spec.md §4.9 step 3).
    /// Nodes whose label isn't entity-extraction eligible (including
    /// skip-embedding Entity subtypes) are pre-advanced from `linked`
    /// first, since they'd otherwise never reach `embedding` without a
    /// file transition driving them there.
    pub async fn process_linked_nodes(&self) -> Result<LinkedReport> {
        let mut report = LinkedReport::default();
        let skip_types = self.skip_embedding_types().await;
        let service = self.embedding_service(skip_types);

        self.advance_linked_nodes().await?;

        let pending = self.nodes.get_in_state(&self.project_id, NodeState::Embedding).await?;
        let embed_report = service.embed_nodes(pending).await?;
        report.nodes_embedded = embed_report.nodes_embedded;
        report.chunks_created = embed_report.chunks_created;
        Ok(report)
    }

    /// Partitions every project-wide node in `linked` by whether its label
    /// is entity-extraction eligible (spec.md §4.8): eligible document
    /// variants move to `entities` to await the coordinator, everything
    /// else (Scope, CodeBlock, EmbeddingChunk, and Entity nodes themselves)
    /// skips straight to `embedding`, per the general rule that only
    /// entity-eligible labels need the `entities` stop.
    async fn advance_linked_nodes(&self) -> Result<()> {
        let linked = self.nodes.get_in_state(&self.project_id, NodeState::Linked).await?;
        let mut eligible = Vec::new();
        let mut ineligible = Vec::new();
        for node in linked {
            if node.labels.iter().any(|l| ENTITY_ELIGIBLE_LABELS.contains(&l.as_str())) {
                eligible.push(node.uuid);
            } else {
                ineligible.push(node.uuid);
            }
        }
        if !eligible.is_empty() {
            self.nodes.transition_batch(&eligible, NodeState::Entities).await?;
        }
        if !ineligible.is_empty() {
            self.nodes.transition_batch(&ineligible, NodeState::Embedding).await?;
        }
        Ok(())
    }

    /// Sweeps every project-wide node still in `entities` to `embedding`,
    /// once the coordinator has had its chance to process them. The
    /// coordinator itself never changes node state (`entities/mod.rs`
    /// queries but doesn't advance), so this is the processor's job.
    async fn advance_entities_to_embedding(&self) -> Result<()> {
        let pending = self.nodes.get_in_state(&self.project_id, NodeState::Entities).await?;
        let uuids: Vec<String> = pending.into_iter().map(|n| n.uuid).collect();
        if !uuids.is_empty() {
            self.nodes.transition_batch(&uuids, NodeState::Embedding).await?;
        }
        Ok(())
    }

    /// Runs the full single-file pipeline: discovered through linked,
    /// then entities and embedding for that file alone (spec.md §4.9
    /// step 4). Used by the watcher for a single changed file instead of
    /// scanning the whole project.
    pub async fn process_file(&self, file: FileRecord) -> Result<()> {
        self.process_one_discovered(file.clone()).await?;
        let _ = self.relations.sweep_pending_imports(&self.project_id).await?;

        self.files.transition(&file.uuid, FileState::Entities, TransitionOptions::default()).await?;
        self.advance_linked_nodes().await?;

        let entity_report = self.entities.run(&self.project_id).await?;
        debug!(file = %file.relative_path, entities = entity_report.entities_created, "entity phase complete for file");

        self.advance_linked_nodes().await?;
        self.advance_entities_to_embedding().await?;

        self.files.transition(&file.uuid, FileState::Embedding, TransitionOptions::default()).await?;

        let skip_types = self.skip_embedding_types().await;
        let service = self.embedding_service(skip_types);

        let nodes = self.nodes.get_nodes_by_file(&file.uuid).await?;
        let in_embedding: Vec<NodeRecord> = nodes.into_iter().filter(|n| n.state == NodeState::Embedding).collect();
        service.embed_nodes(in_embedding).await?;

        let entity_nodes = self
            .nodes
            .get_in_state_for_label(&self.project_id, crate::graph::model::LABEL_ENTITY, NodeState::Embedding)
            .await?;
        if !entity_nodes.is_empty() {
            service.embed_nodes(entity_nodes).await?;
        }

        self.files.transition(&file.uuid, FileState::Embedded, TransitionOptions::default()).await?;
        Ok(())
    }

    /// Resets files stuck in an intermediate state (a crash mid-pipeline)
    /// back to `discovered`, and retryable `error` files back to
    /// `discovered` as well, so the next `process_discovered` pass picks
    /// them back up (spec.md §4.9 step 5).
    pub async fn recover(&self) -> Result<RecoverReport> {
        let mut report = RecoverReport::default();

        let intermediate = [
            FileState::Parsing,
            FileState::Parsed,
            FileState::Relations,
            FileState::Linked,
            FileState::Entities,
            FileState::Embedding,
        ];
        for state in intermediate {
            let stuck = self.files.get_files_in_state(&self.project_id, state).await?;
            for file in stuck {
                self.files
                    .transition(&file.uuid, FileState::Discovered, TransitionOptions::default())
                    .await?;
                report.states_reset += 1;
                report.files_recovered += 1;
            }
        }

        let retryable = self
            .files
            .get_retryable_files(&self.project_id, self.config.max_retries as u32)
            .await?;
        report.files_in_error = retryable.len();
        for file in &retryable {
            self.files
                .transition(&file.uuid, FileState::Discovered, TransitionOptions::default())
                .await?;
            report.files_recovered += 1;
        }

        Ok(report)
    }

    /// Upserts virtual File nodes from in-memory content (no filesystem
    /// involved), marks them discovered, then runs `process_discovered`
    /// and `process_linked` so the caller gets a fully-ingested result in
    /// one call (spec.md §4.9 step 6). `additional_properties` on the
    /// input is propagated onto the file's `MarkdownDocument`/
    /// `DocumentFile` root node once parsing assigns it a uuid.
    pub async fn ingest_virtual_files(&self, inputs: Vec<VirtualFileInput>) -> Result<(DiscoveredReport, LinkedReport)> {
        let entries: Vec<DiscoveredEntry> = inputs
            .iter()
            .map(|input| DiscoveredEntry {
                relative_path: input.relative_path.clone(),
                absolute_path: None,
                raw_content_hash: hash16(input.content.as_bytes()),
                raw_content: Some(input.content.clone()),
                is_virtual: true,
            })
            .collect();

        self.store.mark_discovered_batch(&self.project_id, entries).await?;

        let discovered_report = self.process_discovered().await?;

        for input in &inputs {
            if input.additional_properties.is_empty() {
                continue;
            }
            let uuid = file_uuid(&self.project_id, &input.relative_path);
            let nodes = self.nodes.get_nodes_by_file(&uuid).await?;
            if let Some(root) = nodes.into_iter().next() {
                let mut root = root;
                for (key, value) in &input.additional_properties {
                    root.properties.insert(key.clone(), value.clone());
                }
                self.nodes.upsert(vec![root]).await?;
            }
        }

        let linked_report = self.process_linked().await?;
        Ok((discovered_report, linked_report))
    }
}
