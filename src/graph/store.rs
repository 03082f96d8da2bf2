use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use memmap2::Mmap;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use usearch::{Index as HnswIndex, IndexOptions, MetricKind, ScalarKind};

use crate::error::{Error, Result};
use crate::graph::model::{
    EdgeRecord, ErrorCause, FileRecord, FileState, NodeRecord, NodeState, TransitionOptions,
    EDGE_MENTIONS, LABEL_ENTITY,
};
use crate::graph::{DiscoveredEntry, GraphStore, MarkDiscoveredReport};

/// Magic bytes identifying a corpus-graph-ingest store file.
pub const MAGIC: &[u8; 8] = b"CGIGRPH\x00";
/// Current store format version.
pub const VERSION: u32 = 1;
/// Fixed header size in bytes: magic(8) + version(4) + json_offset(8) +
/// json_size(8) + vector_region_count(4), padded to 64.
pub const HEADER_SIZE: usize = 64;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn vector_index_key(label: &str, property: &str) -> String {
    format!("{label}:{property}")
}

/// Deterministic mapping from a uuid string to a numeric usearch key.
fn uuid_to_numeric_key(uuid: &str) -> u64 {
    let digest = Sha256::digest(uuid.as_bytes());
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

struct VectorIndex {
    index: HnswIndex,
    dimension: usize,
}

fn create_hnsw(dimensions: usize) -> Result<HnswIndex> {
    let opts = IndexOptions {
        dimensions,
        metric: MetricKind::Cos,
        quantization: ScalarKind::F32,
        connectivity: 16,
        expansion_add: 128,
        expansion_search: 64,
        multi: false,
    };
    let index = HnswIndex::new(&opts)
        .map_err(|e| Error::Serialization(format!("failed to create vector index: {e}")))?;
    index
        .reserve(64)
        .map_err(|e| Error::Serialization(format!("vector index reserve: {e}")))?;
    Ok(index)
}

#[derive(Default, serde::Serialize, serde::Deserialize)]
struct Snapshot {
    files: HashMap<String, FileRecord>,
    nodes: HashMap<String, NodeRecord>,
    edges: Vec<EdgeRecord>,
    dimensions_by_index: HashMap<String, usize>,
}

struct Data {
    files: HashMap<String, FileRecord>,
    nodes: HashMap<String, NodeRecord>,
    edges: Vec<EdgeRecord>,
    vector_indices: HashMap<String, VectorIndex>,
    dirty: bool,
}

/// Embedded, memory-mapped graph store: the default `GraphStore`
/// implementation. Files, nodes, and edges are kept as an in-memory graph
/// guarded by a single lock and persisted atomically (write-tmp, fsync,
/// rename) as one JSON metadata region plus one serialized region per
/// provisioned vector index, behind a fixed-size header that records each
/// region's offset and size.
pub struct EmbeddedGraphStore {
    path: PathBuf,
    data: RwLock<Data>,
}

impl EmbeddedGraphStore {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        match Self::open(path) {
            Ok(store) => Ok(store),
            Err(Error::StoreNotFound { .. }) => Self::create(path),
            Err(e) => Err(e),
        }
    }

    pub fn create(path: &Path) -> Result<Self> {
        let store = Self {
            path: path.to_path_buf(),
            data: RwLock::new(Data {
                files: HashMap::new(),
                nodes: HashMap::new(),
                edges: Vec::new(),
                vector_indices: HashMap::new(),
                dirty: false,
            }),
        };
        store.write_to_disk()?;
        Ok(store)
    }

    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::StoreNotFound {
                path: path.to_path_buf(),
            });
        }
        let file = fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE {
            return Err(Error::StoreCorrupted("file too small for header".into()));
        }
        if &mmap[..8] != MAGIC {
            return Err(Error::StoreCorrupted("invalid magic bytes".into()));
        }
        let version = u32::from_le_bytes(mmap[8..12].try_into().unwrap());
        if version != VERSION {
            return Err(Error::StoreCorrupted(format!(
                "unsupported store version: {version}"
            )));
        }
        let json_offset = u64::from_le_bytes(mmap[12..20].try_into().unwrap()) as usize;
        let json_size = u64::from_le_bytes(mmap[20..28].try_into().unwrap()) as usize;
        let vector_region_count = u32::from_le_bytes(mmap[28..32].try_into().unwrap()) as usize;

        if json_offset + json_size > mmap.len() {
            return Err(Error::StoreCorrupted("truncated json region".into()));
        }
        let snapshot: Snapshot = serde_json::from_slice(&mmap[json_offset..json_offset + json_size])
            .map_err(|e| Error::Serialization(format!("snapshot decode: {e}")))?;

        let mut cursor = json_offset + json_size;
        let mut vector_indices = HashMap::new();
        for _ in 0..vector_region_count {
            let name_len = u32::from_le_bytes(mmap[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            let name = String::from_utf8_lossy(&mmap[cursor..cursor + name_len]).to_string();
            cursor += name_len;
            let size = u64::from_le_bytes(mmap[cursor..cursor + 8].try_into().unwrap()) as usize;
            cursor += 8;
            let dimension = *snapshot.dimensions_by_index.get(&name).ok_or_else(|| {
                Error::StoreCorrupted(format!("missing dimension for vector index {name}"))
            })?;
            let index = create_hnsw(dimension)?;
            if size > 0 {
                index
                    .load_from_buffer(&mmap[cursor..cursor + size])
                    .map_err(|e| Error::Serialization(format!("vector index load: {e}")))?;
            }
            cursor += size;
            vector_indices.insert(name, VectorIndex { index, dimension });
        }

        Ok(Self {
            path: path.to_path_buf(),
            data: RwLock::new(Data {
                files: snapshot.files,
                nodes: snapshot.nodes,
                edges: snapshot.edges,
                vector_indices,
                dirty: false,
            }),
        })
    }

    fn write_to_disk(&self) -> Result<()> {
        let data = self.data.read();

        let mut dimensions_by_index = HashMap::new();
        for (name, vi) in data.vector_indices.iter() {
            dimensions_by_index.insert(name.clone(), vi.dimension);
        }
        let snapshot = Snapshot {
            files: data.files.clone(),
            nodes: data.nodes.clone(),
            edges: data.edges.clone(),
            dimensions_by_index,
        };
        let json_bytes =
            serde_json::to_vec(&snapshot).map_err(|e| Error::Serialization(e.to_string()))?;

        let mut vector_regions: Vec<(String, Vec<u8>)> = Vec::new();
        for (name, vi) in data.vector_indices.iter() {
            let len = vi.index.serialized_length();
            let mut buf = vec![0u8; len];
            vi.index
                .save_to_buffer(&mut buf)
                .map_err(|e| Error::Serialization(format!("vector index save: {e}")))?;
            vector_regions.push((name.clone(), buf));
        }

        let json_offset: u64 = HEADER_SIZE as u64;
        let json_size: u64 = json_bytes.len() as u64;

        let mut header = [0u8; HEADER_SIZE];
        header[..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        header[12..20].copy_from_slice(&json_offset.to_le_bytes());
        header[20..28].copy_from_slice(&json_size.to_le_bytes());
        header[28..32].copy_from_slice(&(vector_regions.len() as u32).to_le_bytes());

        let tmp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&header)?;
        file.write_all(&json_bytes)?;
        for (name, buf) in &vector_regions {
            file.write_all(&(name.len() as u32).to_le_bytes())?;
            file.write_all(name.as_bytes())?;
            file.write_all(&(buf.len() as u64).to_le_bytes())?;
            file.write_all(buf)?;
        }
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl GraphStore for EmbeddedGraphStore {
    async fn mark_discovered_batch(
        &self,
        project_id: &str,
        entries: Vec<DiscoveredEntry>,
    ) -> Result<MarkDiscoveredReport> {
        let mut data = self.data.write();
        let mut report = MarkDiscoveredReport::default();

        for entry in entries {
            let file_uuid = crate::ids::file_uuid(project_id, &entry.relative_path);

            match data.files.get_mut(&file_uuid) {
                Some(existing) => {
                    let changed = existing.raw_content_hash != entry.raw_content_hash;
                    let was_error = existing.state == FileState::Error;
                    if changed || was_error {
                        existing.raw_content_hash = entry.raw_content_hash;
                        existing.raw_content = entry.raw_content.clone();
                        existing.state = FileState::Discovered;
                        existing.state_changed_at = now_secs();
                        existing.error_type = None;
                        existing.error_message = None;
                        report.reset.push(file_uuid.clone());
                    } else {
                        report.skipped.push(file_uuid.clone());
                    }
                }
                None => {
                    let name = entry
                        .relative_path
                        .rsplit('/')
                        .next()
                        .unwrap_or(&entry.relative_path)
                        .to_string();
                    let extension = name.rsplit('.').next().unwrap_or("").to_string();
                    let directory = entry
                        .relative_path
                        .rsplit_once('/')
                        .map(|(dir, _)| dir.to_string())
                        .unwrap_or_default();
                    data.files.insert(
                        file_uuid.clone(),
                        FileRecord {
                            uuid: file_uuid.clone(),
                            project_id: project_id.to_string(),
                            relative_path: entry.relative_path.clone(),
                            absolute_path: entry.absolute_path.clone(),
                            name,
                            extension,
                            directory,
                            raw_content_hash: entry.raw_content_hash.clone(),
                            content_hash: None,
                            raw_content: entry.raw_content.clone(),
                            is_virtual: entry.is_virtual,
                            state: FileState::Discovered,
                            state_changed_at: now_secs(),
                            error_type: None,
                            error_message: None,
                            retry_count: 0,
                        },
                    );
                    report.created.push(file_uuid.clone());
                }
            }
        }
        data.dirty = true;
        Ok(report)
    }

    async fn transition_file(
        &self,
        uuid: &str,
        target: FileState,
        options: TransitionOptions,
    ) -> Result<()> {
        let mut data = self.data.write();
        let file = data
            .files
            .get_mut(uuid)
            .ok_or_else(|| Error::NotFound { path: uuid.into() })?;
        if !file.state.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: file.state.to_string(),
                to: target.to_string(),
            });
        }
        file.state = target;
        file.state_changed_at = now_secs();
        if target == FileState::Error {
            file.error_type = options.error_type;
            file.error_message = options.error_message;
            file.retry_count += 1;
        }
        data.dirty = true;
        Ok(())
    }

    async fn transition_files_batch(&self, uuids: &[String], target: FileState) -> Result<()> {
        for uuid in uuids {
            self.transition_file(uuid, target, TransitionOptions::default())
                .await?;
        }
        Ok(())
    }

    async fn get_files_in_state(&self, project_id: &str, state: FileState) -> Result<Vec<FileRecord>> {
        let data = self.data.read();
        Ok(data
            .files
            .values()
            .filter(|f| f.project_id == project_id && f.state == state)
            .cloned()
            .collect())
    }

    async fn get_retryable_files(&self, project_id: &str, max_retries: u32) -> Result<Vec<FileRecord>> {
        let data = self.data.read();
        Ok(data
            .files
            .values()
            .filter(|f| {
                f.project_id == project_id && f.state == FileState::Error && f.retry_count < max_retries
            })
            .cloned()
            .collect())
    }

    async fn get_state_stats(&self, project_id: &str) -> Result<HashMap<FileState, usize>> {
        let data = self.data.read();
        let mut stats = HashMap::new();
        for f in data.files.values().filter(|f| f.project_id == project_id) {
            *stats.entry(f.state).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn get_file(&self, uuid: &str) -> Result<Option<FileRecord>> {
        Ok(self.data.read().files.get(uuid).cloned())
    }

    async fn set_file_content_hash(&self, uuid: &str, content_hash: &str) -> Result<()> {
        let mut data = self.data.write();
        let file = data
            .files
            .get_mut(uuid)
            .ok_or_else(|| Error::NotFound { path: uuid.into() })?;
        file.content_hash = Some(content_hash.to_string());
        data.dirty = true;
        Ok(())
    }

    async fn delete_file_cascade(&self, uuid: &str) -> Result<()> {
        let mut data = self.data.write();
        data.files.remove(uuid);
        let node_uuids: Vec<String> = data
            .nodes
            .values()
            .filter(|n| n.file_uuid.as_deref() == Some(uuid))
            .map(|n| n.uuid.clone())
            .collect();
        for nu in &node_uuids {
            data.nodes.remove(nu);
        }
        data.edges
            .retain(|e| e.from != uuid && e.to != uuid && !node_uuids.contains(&e.from) && !node_uuids.contains(&e.to));
        data.dirty = true;
        Ok(())
    }

    async fn upsert_nodes(&self, nodes: Vec<NodeRecord>) -> Result<()> {
        let mut data = self.data.write();
        for node in nodes {
            data.nodes.insert(node.uuid.clone(), node);
        }
        data.dirty = true;
        Ok(())
    }

    async fn get_nodes_by_file(&self, file_uuid: &str) -> Result<Vec<NodeRecord>> {
        let data = self.data.read();
        Ok(data
            .nodes
            .values()
            .filter(|n| n.file_uuid.as_deref() == Some(file_uuid))
            .cloned()
            .collect())
    }

    async fn get_node(&self, uuid: &str) -> Result<Option<NodeRecord>> {
        Ok(self.data.read().nodes.get(uuid).cloned())
    }

    async fn get_nodes_in_state(&self, project_id: &str, state: NodeState) -> Result<Vec<NodeRecord>> {
        let data = self.data.read();
        Ok(data
            .nodes
            .values()
            .filter(|n| n.project_id == project_id && n.state == state)
            .cloned()
            .collect())
    }

    async fn get_nodes_in_state_for_label(
        &self,
        project_id: &str,
        label: &str,
        state: NodeState,
    ) -> Result<Vec<NodeRecord>> {
        let data = self.data.read();
        Ok(data
            .nodes
            .values()
            .filter(|n| n.project_id == project_id && n.state == state && n.has_label(label))
            .cloned()
            .collect())
    }

    async fn transition_node(&self, uuid: &str, target: NodeState) -> Result<()> {
        let mut data = self.data.write();
        let node = data
            .nodes
            .get_mut(uuid)
            .ok_or_else(|| Error::NotFound { path: uuid.into() })?;
        if !node.state.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: node.state.to_string(),
                to: target.to_string(),
            });
        }
        node.state = target;
        node.state_changed_at = now_secs();
        data.dirty = true;
        Ok(())
    }

    async fn transition_nodes_batch(&self, uuids: &[String], target: NodeState) -> Result<()> {
        for uuid in uuids {
            self.transition_node(uuid, target).await?;
        }
        Ok(())
    }

    async fn delete_nodes(&self, uuids: &[String]) -> Result<()> {
        let mut data = self.data.write();
        for uuid in uuids {
            data.nodes.remove(uuid);
        }
        data.edges
            .retain(|e| !uuids.contains(&e.from) && !uuids.contains(&e.to));
        data.dirty = true;
        Ok(())
    }

    async fn upsert_edges(&self, edges: Vec<EdgeRecord>) -> Result<()> {
        let mut data = self.data.write();
        for edge in edges {
            if let Some(existing) = data.edges.iter_mut().find(|e| {
                e.from == edge.from && e.to == edge.to && e.edge_type == edge.edge_type
            }) {
                *existing = edge;
            } else {
                data.edges.push(edge);
            }
        }
        data.dirty = true;
        Ok(())
    }

    async fn get_outbound_edges(&self, from: &str, edge_type: &str) -> Result<Vec<EdgeRecord>> {
        let data = self.data.read();
        Ok(data
            .edges
            .iter()
            .filter(|e| e.from == from && e.edge_type == edge_type)
            .cloned()
            .collect())
    }

    async fn prune_outbound_edges(
        &self,
        from: &str,
        edge_type: &str,
        keep_targets: &[String],
    ) -> Result<Vec<EdgeRecord>> {
        let mut data = self.data.write();
        let dropped: Vec<EdgeRecord> = data
            .edges
            .iter()
            .filter(|e| e.from == from && e.edge_type == edge_type && !keep_targets.contains(&e.to))
            .cloned()
            .collect();
        data.edges.retain(|e| {
            !(e.from == from && e.edge_type == edge_type) || keep_targets.contains(&e.to)
        });
        data.dirty = true;
        Ok(dropped)
    }

    async fn get_pending_imports(&self, project_id: &str) -> Result<Vec<EdgeRecord>> {
        let data = self.data.read();
        Ok(data
            .edges
            .iter()
            .filter(|e| {
                e.edge_type == crate::graph::model::EDGE_PENDING_IMPORT
                    && data
                        .nodes
                        .get(&e.from)
                        .map(|n| n.project_id == project_id)
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn replace_pending_import(
        &self,
        pending: &EdgeRecord,
        resolved_edge_type: &str,
        resolved_to: &str,
    ) -> Result<()> {
        let mut data = self.data.write();
        data.edges.retain(|e| {
            !(e.from == pending.from
                && e.to == pending.to
                && e.edge_type == crate::graph::model::EDGE_PENDING_IMPORT)
        });
        data.edges.push(EdgeRecord {
            from: pending.from.clone(),
            to: resolved_to.to_string(),
            edge_type: resolved_edge_type.to_string(),
            properties: HashMap::new(),
        });
        data.dirty = true;
        Ok(())
    }

    async fn find_nodes_by_name(&self, project_id: &str, name: &str) -> Result<Vec<NodeRecord>> {
        let data = self.data.read();
        Ok(data
            .nodes
            .values()
            .filter(|n| {
                n.project_id == project_id
                    && n.properties.get("_name").and_then(|v| v.as_str()) == Some(name)
            })
            .cloned()
            .collect())
    }

    async fn delete_orphan_entities(&self, project_id: &str) -> Result<Vec<String>> {
        let mut data = self.data.write();
        let mentioned: std::collections::HashSet<String> = data
            .edges
            .iter()
            .filter(|e| e.edge_type == EDGE_MENTIONS)
            .map(|e| e.to.clone())
            .collect();
        let orphans: Vec<String> = data
            .nodes
            .values()
            .filter(|n| {
                n.project_id == project_id && n.has_label(LABEL_ENTITY) && !mentioned.contains(&n.uuid)
            })
            .map(|n| n.uuid.clone())
            .collect();
        for uuid in &orphans {
            data.nodes.remove(uuid);
        }
        data.edges.retain(|e| !orphans.contains(&e.from) && !orphans.contains(&e.to));
        data.dirty = true;
        Ok(orphans)
    }

    async fn ensure_vector_index(&self, label: &str, property: &str, dimension: usize) -> Result<()> {
        let mut data = self.data.write();
        let key = vector_index_key(label, property);
        if !data.vector_indices.contains_key(&key) {
            let index = create_hnsw(dimension)?;
            data.vector_indices.insert(key, VectorIndex { index, dimension });
            data.dirty = true;
        }
        Ok(())
    }

    async fn set_embedding(
        &self,
        node_uuid: &str,
        view: &str,
        vector: Vec<f32>,
        hash: String,
        provider: String,
        model: String,
    ) -> Result<()> {
        let mut data = self.data.write();

        let labels = data
            .nodes
            .get(node_uuid)
            .map(|n| n.labels.clone())
            .ok_or_else(|| Error::NotFound { path: node_uuid.into() })?;

        for label in &labels {
            let key = vector_index_key(label, view);
            if let Some(vi) = data.vector_indices.get(&key) {
                let numeric_key = uuid_to_numeric_key(node_uuid);
                let _ = vi.index.remove(numeric_key);
                vi.index
                    .add(numeric_key, &vector)
                    .map_err(|e| Error::Serialization(format!("vector index add: {e}")))?;
            }
        }

        let node = data.nodes.get_mut(node_uuid).unwrap();
        node.embedding_hashes.insert(view.to_string(), hash);
        node.embedding_provider = Some(provider);
        node.embedding_model = Some(model);
        node.properties.insert(
            format!("embedding_{view}"),
            serde_json::to_value(&vector).unwrap(),
        );
        data.dirty = true;
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        {
            let data = self.data.read();
            if !data.dirty {
                return Ok(());
            }
        }
        self.write_to_disk()?;
        self.data.write().dirty = false;
        Ok(())
    }
}
