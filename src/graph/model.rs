use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Lifecycle states shared by files and nodes. Files additionally pass
/// through `Relations` and land on `Embedded`; nodes skip `Relations` and
/// land on `Ready`. See [`FileState`] and [`NodeState`].
pub const DISCOVERED: &str = "discovered";
pub const PARSING: &str = "parsing";
pub const PARSED: &str = "parsed";
pub const RELATIONS: &str = "relations";
pub const LINKED: &str = "linked";
pub const ENTITIES: &str = "entities";
pub const EMBEDDING: &str = "embedding";
pub const EMBEDDED: &str = "embedded";
pub const READY: &str = "ready";
pub const ERROR: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileState {
    Discovered,
    Parsing,
    Parsed,
    Relations,
    Linked,
    Entities,
    Embedding,
    Embedded,
    Error,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => DISCOVERED,
            Self::Parsing => PARSING,
            Self::Parsed => PARSED,
            Self::Relations => RELATIONS,
            Self::Linked => LINKED,
            Self::Entities => ENTITIES,
            Self::Embedding => EMBEDDING,
            Self::Embedded => EMBEDDED,
            Self::Error => ERROR,
        }
    }

    pub fn all() -> [FileState; 9] {
        [
            Self::Discovered,
            Self::Parsing,
            Self::Parsed,
            Self::Relations,
            Self::Linked,
            Self::Entities,
            Self::Embedding,
            Self::Embedded,
            Self::Error,
        ]
    }

    /// True if `target` is a legal transition from `self`, per spec.md §4.2.
    pub fn can_transition_to(&self, target: FileState) -> bool {
        if target == Self::Error {
            return true;
        }
        use FileState::*;
        match (self, target) {
            (Discovered, Parsing)
            | (Parsing, Parsed)
            | (Parsed, Relations)
            | (Relations, Linked)
            | (Linked, Entities)
            | (Entities, Embedding)
            | (Embedding, Embedded) => true,
            (Error, Discovered) => true,
            (Embedded, Discovered) => true,
            // any intermediate state may be reset to Discovered during recovery
            (Parsing, Discovered)
            | (Parsed, Discovered)
            | (Relations, Discovered)
            | (Linked, Discovered)
            | (Entities, Discovered)
            | (Embedding, Discovered) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            DISCOVERED => Self::Discovered,
            PARSING => Self::Parsing,
            PARSED => Self::Parsed,
            RELATIONS => Self::Relations,
            LINKED => Self::Linked,
            ENTITIES => Self::Entities,
            EMBEDDING => Self::Embedding,
            EMBEDDED => Self::Embedded,
            ERROR => Self::Error,
            other => return Err(Error::Config(format!("unknown file state '{other}'"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    Discovered,
    Parsing,
    Parsed,
    Linked,
    Entities,
    Embedding,
    Ready,
    Error,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => DISCOVERED,
            Self::Parsing => PARSING,
            Self::Parsed => PARSED,
            Self::Linked => LINKED,
            Self::Entities => ENTITIES,
            Self::Embedding => EMBEDDING,
            Self::Ready => READY,
            Self::Error => ERROR,
        }
    }

    pub fn can_transition_to(&self, target: NodeState) -> bool {
        if target == Self::Error {
            return true;
        }
        use NodeState::*;
        matches!(
            (self, target),
            (Discovered, Parsing)
                | (Parsing, Parsed)
                | (Parsed, Linked)
                | (Discovered, Linked) // freshly-upserted nodes batched straight to "linked" alongside their file
                | (Ready, Linked) // a restored snapshot can already be "ready" when its file reparses
                | (Linked, Entities)
                | (Entities, Embedding)
                | (Embedding, Ready)
                | (Error, Discovered)
                | (Linked, Embedding) // skip-embedding entities jump straight past "entities"
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NodeState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            DISCOVERED => Self::Discovered,
            PARSING => Self::Parsing,
            PARSED => Self::Parsed,
            LINKED => Self::Linked,
            ENTITIES => Self::Entities,
            EMBEDDING => Self::Embedding,
            READY => Self::Ready,
            ERROR => Self::Error,
            other => return Err(Error::Config(format!("unknown node state '{other}'"))),
        })
    }
}

/// Typed cause recorded on a file or node that transitioned to `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCause {
    Parse,
    Relations,
    Entities,
    Embed,
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Parse => "parse",
            Self::Relations => "relations",
            Self::Entities => "entities",
            Self::Embed => "embed",
        };
        write!(f, "{s}")
    }
}

/// Options passed to a state transition; carries the error cause when
/// transitioning to `error`.
#[derive(Debug, Clone, Default)]
pub struct TransitionOptions {
    pub error_type: Option<ErrorCause>,
    pub error_message: Option<String>,
}

/// A File node as described in spec.md §3.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub uuid: String,
    pub project_id: String,
    pub relative_path: String,
    pub absolute_path: Option<String>,
    pub name: String,
    pub extension: String,
    pub directory: String,
    pub raw_content_hash: String,
    pub content_hash: Option<String>,
    pub raw_content: Option<String>,
    pub is_virtual: bool,
    pub state: FileState,
    pub state_changed_at: i64,
    pub error_type: Option<ErrorCause>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

/// A graph node (Scope, document variant, Entity, or EmbeddingChunk), as a
/// dynamically-labeled property bag per spec.md §3.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub uuid: String,
    pub project_id: String,
    pub labels: Vec<String>,
    pub file_uuid: Option<String>,
    pub properties: HashMap<String, serde_json::Value>,
    pub state: NodeState,
    pub state_changed_at: i64,
    /// view name -> stored hash
    pub embedding_hashes: HashMap<String, String>,
    pub embedding_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub uses_chunks: bool,
    pub chunk_count: u32,
    pub entities_content_hash: Option<String>,
}

impl NodeRecord {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// A typed edge between two nodes (or a node and the Project), per
/// spec.md §3.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: String,
    pub to: String,
    pub edge_type: String,
    pub properties: HashMap<String, serde_json::Value>,
}

pub const EDGE_MENTIONS: &str = "MENTIONS";
pub const EDGE_PENDING_IMPORT: &str = "PENDING_IMPORT";
pub const EDGE_CONSUMES: &str = "CONSUMES";
pub const EDGE_INHERITS_FROM: &str = "INHERITS_FROM";
pub const EDGE_IMPLEMENTS: &str = "IMPLEMENTS";
pub const EDGE_DECORATED_BY: &str = "DECORATED_BY";
pub const EDGE_RELATED_TO: &str = "RELATED_TO";
pub const EDGE_DEFINED_IN: &str = "DEFINED_IN";
pub const EDGE_HAS_EMBEDDING_CHUNK: &str = "HAS_EMBEDDING_CHUNK";
pub const EDGE_BELONGS_TO: &str = "BELONGS_TO";

/// Edge types whose stale cleanup mirrors `MENTIONS`'s per spec.md's
/// resolved Open Question 3: resolved reference edges written by the
/// relationship resolver in a single pass from one source node.
pub const RESOLVED_REFERENCE_EDGE_TYPES: &[&str] = &[
    EDGE_CONSUMES,
    EDGE_INHERITS_FROM,
    EDGE_IMPLEMENTS,
    EDGE_DECORATED_BY,
];

pub const LABEL_ENTITY: &str = "Entity";
pub const LABEL_EMBEDDING_CHUNK: &str = "EmbeddingChunk";
pub const LABEL_SCOPE: &str = "Scope";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_state_roundtrips_through_str() {
        for state in FileState::all() {
            let parsed: FileState = state.as_str().parse().unwrap();
            assert_eq!(parsed.as_str(), state.as_str());
        }
    }

    #[test]
    fn file_linear_transition_allowed() {
        assert!(FileState::Discovered.can_transition_to(FileState::Parsing));
        assert!(FileState::Embedding.can_transition_to(FileState::Embedded));
    }

    #[test]
    fn file_skip_ahead_rejected() {
        assert!(!FileState::Discovered.can_transition_to(FileState::Embedded));
    }

    #[test]
    fn any_state_to_error_allowed() {
        for state in FileState::all() {
            assert!(state.can_transition_to(FileState::Error));
        }
    }

    #[test]
    fn error_to_discovered_is_retry() {
        assert!(FileState::Error.can_transition_to(FileState::Discovered));
    }

    #[test]
    fn embedded_to_discovered_is_external_invalidation() {
        assert!(FileState::Embedded.can_transition_to(FileState::Discovered));
    }

    #[test]
    fn node_state_has_no_relations_variant() {
        assert!("relations".parse::<NodeState>().is_err());
    }
}
