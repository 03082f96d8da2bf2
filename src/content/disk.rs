use std::path::PathBuf;

use async_trait::async_trait;

use crate::content::ContentProvider;
use crate::error::{Error, Result};
use crate::graph::FileRecord;

/// Reads file bytes straight off disk, keyed by the file's absolute path.
pub struct DiskContentProvider {
    root: PathBuf,
}

impl DiskContentProvider {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, file: &FileRecord) -> PathBuf {
        match &file.absolute_path {
            Some(abs) => PathBuf::from(abs),
            None => self.root.join(&file.relative_path),
        }
    }
}

#[async_trait]
impl ContentProvider for DiskContentProvider {
    async fn read(&self, file: &FileRecord) -> Result<Vec<u8>> {
        let path = self.resolve(file);
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound { path: path.clone() }
            } else {
                Error::Unreadable {
                    path,
                    message: e.to_string(),
                }
            }
        })
    }

    async fn exists(&self, file: &FileRecord) -> bool {
        tokio::fs::metadata(self.resolve(file)).await.is_ok()
    }
}
