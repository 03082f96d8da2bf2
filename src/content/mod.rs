pub mod disk;
pub mod hybrid;
pub mod virtual_store;

pub use disk::DiskContentProvider;
pub use hybrid::HybridContentProvider;
pub use virtual_store::VirtualContentProvider;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::graph::FileRecord;

/// First 16 hex chars of SHA-256, the crate-wide content hashing convention
/// (spec.md §4.1).
pub fn hash16(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// A file is virtual iff it carries the `isVirtual` flag, has no absolute
/// path, or lives under a reserved virtual prefix (spec.md §4.1).
pub const VIRTUAL_PATH_PREFIX: &str = "virtual://";

pub fn is_virtual(file: &FileRecord) -> bool {
    file.is_virtual || file.absolute_path.is_none() || file.relative_path.starts_with(VIRTUAL_PATH_PREFIX)
}

/// Result of a batch read: successes, their hashes, and per-file errors.
#[derive(Default)]
pub struct BatchReadResult {
    pub bytes: HashMap<String, Vec<u8>>,
    pub hashes: HashMap<String, String>,
    pub errors: HashSet<String>,
}

/// Uniform read-by-identity access to file bytes, polymorphic over
/// `{disk, virtual, hybrid}` (spec.md §4.1, C1).
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn read(&self, file: &FileRecord) -> Result<Vec<u8>>;

    async fn read_with_hash(&self, file: &FileRecord) -> Result<(Vec<u8>, String)> {
        let bytes = self.read(file).await?;
        let hash = hash16(&bytes);
        Ok((bytes, hash))
    }

    async fn exists(&self, file: &FileRecord) -> bool;

    async fn read_batch(&self, files: &[FileRecord]) -> BatchReadResult {
        let mut result = BatchReadResult::default();
        for file in files {
            match self.read_with_hash(file).await {
                Ok((bytes, hash)) => {
                    result.bytes.insert(file.uuid.clone(), bytes);
                    result.hashes.insert(file.uuid.clone(), hash);
                }
                Err(_) => {
                    result.errors.insert(file.uuid.clone());
                }
            }
        }
        result
    }
}
