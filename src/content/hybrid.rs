use std::sync::Arc;

use async_trait::async_trait;

use crate::content::{is_virtual, BatchReadResult, ContentProvider, DiskContentProvider, VirtualContentProvider};
use crate::error::Result;
use crate::graph::FileRecord;

/// Partitions reads between the disk and virtual providers by each file's
/// `isVirtual` status and merges the results (spec.md §4.1).
pub struct HybridContentProvider {
    disk: DiskContentProvider,
    virtual_store: VirtualContentProvider,
}

impl HybridContentProvider {
    pub fn new(disk: DiskContentProvider, virtual_store: VirtualContentProvider) -> Self {
        Self { disk, virtual_store }
    }

    pub fn from_parts(root: std::path::PathBuf, store: Arc<dyn crate::graph::GraphStore>) -> Self {
        Self::new(DiskContentProvider::new(root), VirtualContentProvider::new(store))
    }
}

#[async_trait]
impl ContentProvider for HybridContentProvider {
    async fn read(&self, file: &FileRecord) -> Result<Vec<u8>> {
        if is_virtual(file) {
            self.virtual_store.read(file).await
        } else {
            self.disk.read(file).await
        }
    }

    async fn exists(&self, file: &FileRecord) -> bool {
        if is_virtual(file) {
            self.virtual_store.exists(file).await
        } else {
            self.disk.exists(file).await
        }
    }

    async fn read_batch(&self, files: &[FileRecord]) -> BatchReadResult {
        let (virtual_files, disk_files): (Vec<_>, Vec<_>) =
            files.iter().cloned().partition(|f| is_virtual(f));

        let mut result = self.disk.read_batch(&disk_files).await;
        let virtual_result = self.virtual_store.read_batch(&virtual_files).await;
        result.bytes.extend(virtual_result.bytes);
        result.hashes.extend(virtual_result.hashes);
        result.errors.extend(virtual_result.errors);
        result
    }
}
