use std::path::PathBuf;

/// All errors that can occur while discovering, parsing, resolving, or
/// enriching corpus content.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("content not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("content unreadable: {}: {message}", path.display())]
    Unreadable { path: PathBuf, message: String },

    #[error("parse failure in {}: {message}", path.display())]
    ParseFailure { path: PathBuf, message: String },

    #[error("relationship resolution failure: {0}")]
    RelationFailure(String),

    #[error("entity extraction service unavailable: {0}")]
    EntityServiceUnavailable(String),

    #[error("entity extraction timed out after {0:?}")]
    EntityTimeout(std::time::Duration),

    #[error("embedding batch timed out after {0:?}")]
    EmbeddingTimeout(std::time::Duration),

    #[error("embedding provider missing or misconfigured: {0}")]
    EmbeddingProviderMissing(String),

    #[error("graph store error: {0}")]
    GraphTransient(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("graph store not found: {}", path.display())]
    StoreNotFound { path: PathBuf },

    #[error("graph store corrupted: {0}")]
    StoreCorrupted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("watch error: {0}")]
    Watch(String),

    #[error("logging initialization failed: {0}")]
    Logging(String),

    #[error("lock acquisition timed out")]
    LockTimeout,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
