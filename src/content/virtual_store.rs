use std::sync::Arc;

use async_trait::async_trait;

use crate::content::ContentProvider;
use crate::error::{Error, Result};
use crate::graph::{FileRecord, GraphStore};

/// Reads bytes stored as the `_rawContent` property on graph-resident
/// ("virtual") File nodes — no filesystem involved.
pub struct VirtualContentProvider {
    store: Arc<dyn GraphStore>,
}

impl VirtualContentProvider {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ContentProvider for VirtualContentProvider {
    async fn read(&self, file: &FileRecord) -> Result<Vec<u8>> {
        match &file.raw_content {
            Some(content) => Ok(content.as_bytes().to_vec()),
            None => {
                // re-fetch in case the caller holds a stale snapshot
                let current = self.store.get_file(&file.uuid).await?;
                current
                    .and_then(|f| f.raw_content)
                    .map(|c| c.into_bytes())
                    .ok_or_else(|| Error::NotFound {
                        path: file.relative_path.clone().into(),
                    })
            }
        }
    }

    async fn exists(&self, file: &FileRecord) -> bool {
        if file.raw_content.is_some() {
            return true;
        }
        matches!(
            self.store.get_file(&file.uuid).await,
            Ok(Some(f)) if f.raw_content.is_some()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::store::EmbeddedGraphStore;
    use crate::graph::{DiscoveredEntry, FileState};
    use tempfile::TempDir;

    #[tokio::test]
    async fn reads_raw_content_property() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EmbeddedGraphStore::create(&dir.path().join("s.bin")).unwrap());
        let report = store
            .mark_discovered_batch(
                "p",
                vec![DiscoveredEntry {
                    relative_path: "virtual://a.md".into(),
                    absolute_path: None,
                    raw_content_hash: "h".into(),
                    raw_content: Some("virtual bytes".into()),
                    is_virtual: true,
                }],
            )
            .await
            .unwrap();
        let file = store.get_file(&report.created[0]).await.unwrap().unwrap();
        let provider = VirtualContentProvider::new(store);
        let bytes = provider.read(&file).await.unwrap();
        assert_eq!(bytes, b"virtual bytes");
    }

    #[tokio::test]
    async fn missing_content_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(EmbeddedGraphStore::create(&dir.path().join("s.bin")).unwrap());
        let provider = VirtualContentProvider::new(store);
        let file = FileRecord {
            uuid: "missing".into(),
            project_id: "p".into(),
            relative_path: "virtual://x".into(),
            absolute_path: None,
            name: "x".into(),
            extension: "".into(),
            directory: "".into(),
            raw_content_hash: "h".into(),
            content_hash: None,
            raw_content: None,
            is_virtual: true,
            state: FileState::Discovered,
            state_changed_at: 0,
            error_type: None,
            error_message: None,
            retry_count: 0,
        };
        let err = provider.read(&file).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
