use std::path::Path;

use crate::content::hash16;
use crate::error::Result;
use crate::parser::{ParsedGraph, ParsedNode, Parser};

/// Generic fallback: wraps the whole file as a single `DocumentFile` node
/// with no structural decomposition. Last in dispatch order (spec.md
/// §4.5) — always claims the file, since nothing else does.
pub struct TextParser;

impl TextParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for TextParser {
    fn can_parse(&self, _path: &Path) -> bool {
        true
    }

    fn parse(&self, path: &Path, bytes: &[u8]) -> Result<ParsedGraph> {
        let content = String::from_utf8_lossy(bytes).into_owned();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("untitled")
            .to_string();

        let mut props = serde_json::Map::new();
        props.insert("_name".into(), serde_json::json!(name));
        props.insert("_content".into(), serde_json::json!(content));
        props.insert("rawBytesHash".into(), serde_json::json!(hash16(bytes)));

        Ok(ParsedGraph {
            nodes: vec![ParsedNode {
                id: "doc".to_string(),
                labels: vec!["DocumentFile".to_string()],
                properties: props.into_iter().collect(),
            }],
            relationships: vec![],
            metadata: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_arbitrary_bytes_as_single_node() {
        let parser = TextParser::new();
        let graph = parser.parse(Path::new("notes.txt"), b"hello there").unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].labels, vec!["DocumentFile".to_string()]);
    }

    #[test]
    fn always_claims_the_file() {
        let parser = TextParser::new();
        assert!(parser.can_parse(Path::new("whatever.bin")));
    }
}
