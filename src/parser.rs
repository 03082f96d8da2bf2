mod markdown;
mod text;

pub use markdown::MarkdownParser;
pub use text::TextParser;

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;

/// A node produced by a parser, before uuid assignment and graph upsert.
/// `labels` mirrors the multi-label document variants of spec.md §3.1
/// (e.g. `["MarkdownDocument"]`, `["MarkdownSection"]`, `["Scope"]`).
#[derive(Debug, Clone)]
pub struct ParsedNode {
    /// Caller-local id, unique within this single parse, used to resolve
    /// `ParsedRelationship::from`/`to` before uuids are assigned.
    pub id: String,
    pub labels: Vec<String>,
    pub properties: HashMap<String, serde_json::Value>,
}

impl ParsedNode {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: vec![label.into()],
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// An edge produced by a parser, referencing `ParsedNode::id` values (or,
/// for unresolved references, a bare symbol name via `target_label`/
/// `target_props`) per spec.md §4.5.
#[derive(Debug, Clone)]
pub struct ParsedRelationship {
    pub edge_type: String,
    pub from: String,
    pub to: Option<String>,
    pub properties: HashMap<String, serde_json::Value>,
    /// When `to` is None, the symbolic target's expected label (used by the
    /// relationship resolver to narrow candidates).
    pub target_label: Option<String>,
    /// When `to` is None, the symbolic target's name, module, etc.
    pub target_props: HashMap<String, serde_json::Value>,
}

impl ParsedRelationship {
    pub fn resolved(
        edge_type: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            edge_type: edge_type.into(),
            from: from.into(),
            to: Some(to.into()),
            properties: HashMap::new(),
            target_label: None,
            target_props: HashMap::new(),
        }
    }

    pub fn unresolved(
        edge_type: impl Into<String>,
        from: impl Into<String>,
        target_label: impl Into<String>,
        symbol_name: impl Into<String>,
    ) -> Self {
        let mut target_props = HashMap::new();
        target_props.insert("symbol".to_string(), serde_json::json!(symbol_name.into()));
        Self {
            edge_type: edge_type.into(),
            from: from.into(),
            to: None,
            properties: HashMap::new(),
            target_label: Some(target_label.into()),
            target_props,
        }
    }
}

/// Output of a parser: the normalized node/edge graph for one file, plus
/// free-form metadata (e.g. per-section page numbers for converted binary
/// documents) per spec.md §4.5.
#[derive(Debug, Clone, Default)]
pub struct ParsedGraph {
    pub nodes: Vec<ParsedNode>,
    pub relationships: Vec<ParsedRelationship>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Collaborator contract: a parser accepts file bytes and returns a
/// normalized [`ParsedGraph`] (spec.md §4.5, C5). Implementations for
/// concrete file kinds are out of scope beyond the markdown and generic
/// text reference parsers this crate ships.
pub trait Parser: Send + Sync {
    fn can_parse(&self, path: &Path) -> bool;
    fn parse(&self, path: &Path, bytes: &[u8]) -> Result<ParsedGraph>;
}

/// Routes each file to the first parser in dispatch order that claims it:
/// text-parseable structured formats, then the generic text fallback.
/// Binary documents (PDF/DOCX/…) are an external collaborator's job to
/// convert to markdown first; this dispatcher only sees the result.
pub struct ParserDispatcher {
    parsers: Vec<Box<dyn Parser>>,
}

impl ParserDispatcher {
    pub fn new() -> Self {
        Self {
            parsers: vec![Box::new(MarkdownParser::new()), Box::new(TextParser::new())],
        }
    }

    pub fn dispatch(&self, path: &Path, bytes: &[u8]) -> Result<ParsedGraph> {
        for parser in &self.parsers {
            if parser.can_parse(path) {
                return parser.parse(path, bytes);
            }
        }
        // TextParser::can_parse always returns true, so this is unreachable
        // in practice; kept for exhaustiveness if the parser list changes.
        self.parsers
            .last()
            .expect("dispatcher always has a fallback parser")
            .parse(path, bytes)
    }
}

impl Default for ParserDispatcher {
    fn default() -> Self {
        Self::new()
    }
}
