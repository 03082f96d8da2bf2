use std::path::Path;
use std::sync::OnceLock;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser as CmarkParser, Tag, TagEnd};
use regex::Regex;

use crate::error::{Error, Result};
use crate::parser::{ParsedGraph, ParsedNode, ParsedRelationship, Parser};

struct Section {
    id: String,
    level: u8,
    title: String,
    start_line: usize,
    body: String,
    parent_id: Option<String>,
}

/// Parses markdown into a `MarkdownDocument` with `MarkdownSection`
/// children (one per heading) and `CodeBlock` children for fenced code,
/// plus `REFERENCES`/`LINKS_TO` edges for markdown links. Adapted from the
/// teacher's frontmatter/heading extraction, generalized from a flat
/// heading list into a nested section graph per spec.md §4.5.
pub struct MarkdownParser;

impl MarkdownParser {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MarkdownParser {
    fn default() -> Self {
        Self::new()
    }
}

fn split_frontmatter(text: &str) -> (Option<serde_json::Value>, &str, usize) {
    if let Some(rest) = text.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            let yaml = &rest[..end];
            let body = &rest[end + 5..];
            let line_offset = yaml.lines().count() + 2;
            let parsed = serde_yaml::from_str::<serde_json::Value>(yaml).ok();
            return (parsed, body, line_offset);
        }
    }
    (None, text, 0)
}

fn wikilink_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[\[([^\]|#]+)(?:#[^\]|]*)?(?:\|[^\]]*)?\]\]").unwrap())
}

/// Pull `[[Target]]`/`[[Target|alias]]` wikilink references out of a
/// section body, mirroring the teacher's `is_wikilink` link flavor on top
/// of the plain markdown links pulldown-cmark already yields as events.
fn extract_wikilinks(owner: &str, body: &str, relationships: &mut Vec<ParsedRelationship>) {
    for caps in wikilink_pattern().captures_iter(body) {
        let target = caps[1].trim();
        if target.is_empty() {
            continue;
        }
        relationships.push(ParsedRelationship::unresolved(
            "LINKS_TO",
            owner.to_string(),
            "MarkdownDocument",
            target.to_string(),
        ));
    }
}

fn heading_level_num(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

impl Parser for MarkdownParser {
    fn can_parse(&self, path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("md") | Some("markdown") | Some("mdx")
        )
    }

    fn parse(&self, path: &Path, bytes: &[u8]) -> Result<ParsedGraph> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::ParseFailure {
                path: path.to_path_buf(),
                message: format!("not valid utf-8: {e}"),
            })?;

        let (frontmatter, body, line_offset) = split_frontmatter(text);

        let doc_id = "doc".to_string();
        let mut nodes = Vec::new();
        let mut relationships = Vec::new();

        let mut doc_props = serde_json::Map::new();
        doc_props.insert(
            "_name".into(),
            serde_json::json!(path.file_name().and_then(|n| n.to_str()).unwrap_or("untitled")),
        );
        doc_props.insert("_content".into(), serde_json::json!(body));
        if let Some(fm) = &frontmatter {
            doc_props.insert("frontmatter".into(), fm.clone());
        }
        nodes.push(ParsedNode {
            id: doc_id.clone(),
            labels: vec!["MarkdownDocument".to_string()],
            properties: doc_props.into_iter().collect(),
        });

        // Walk events, splitting into sections at each heading and
        // capturing fenced code blocks and links within the current section.
        let mut sections: Vec<Section> = Vec::new();
        let mut stack: Vec<(u8, String)> = Vec::new(); // (level, id)
        let mut current: Option<Section> = None;
        let mut current_line = line_offset;
        let mut in_heading = false;
        let mut heading_level = 0u8;
        let mut heading_text = String::new();
        let mut in_code_block = false;
        let mut code_lang = String::new();
        let mut code_text = String::new();
        let mut section_counter = 0usize;
        let mut code_counter = 0usize;

        let parser = CmarkParser::new(body);
        for event in parser {
            match &event {
                Event::Start(Tag::Heading { level, .. }) => {
                    in_heading = true;
                    heading_level = heading_level_num(*level);
                    heading_text.clear();
                }
                Event::End(TagEnd::Heading(_)) => {
                    in_heading = false;
                    if let Some(finished) = current.take() {
                        sections.push(finished);
                    }
                    while let Some((lvl, _)) = stack.last() {
                        if *lvl >= heading_level {
                            stack.pop();
                        } else {
                            break;
                        }
                    }
                    section_counter += 1;
                    let id = format!("section_{section_counter}");
                    let parent_id = stack.last().map(|(_, id)| id.clone());
                    stack.push((heading_level, id.clone()));
                    current = Some(Section {
                        id,
                        level: heading_level,
                        title: heading_text.clone(),
                        start_line: current_line,
                        body: String::new(),
                        parent_id,
                    });
                }
                Event::Start(Tag::CodeBlock(kind)) => {
                    in_code_block = true;
                    code_text.clear();
                    code_lang = match kind {
                        CodeBlockKind::Fenced(lang) => lang.to_string(),
                        CodeBlockKind::Indented => String::new(),
                    };
                }
                Event::End(TagEnd::CodeBlock) => {
                    in_code_block = false;
                    code_counter += 1;
                    let id = format!("code_{code_counter}");
                    let mut props = serde_json::Map::new();
                    props.insert("_content".into(), serde_json::json!(code_text));
                    props.insert("language".into(), serde_json::json!(code_lang));
                    nodes.push(ParsedNode {
                        id: id.clone(),
                        labels: vec!["CodeBlock".to_string()],
                        properties: props.into_iter().collect(),
                    });
                    let owner = current.as_ref().map(|s| s.id.clone()).unwrap_or_else(|| doc_id.clone());
                    relationships.push(ParsedRelationship::resolved("CONTAINS_CODE", owner, id));
                }
                Event::Text(t) => {
                    if in_heading {
                        heading_text.push_str(t);
                    } else if in_code_block {
                        code_text.push_str(t);
                    } else if let Some(section) = current.as_mut() {
                        section.body.push_str(t);
                    }
                    current_line += t.matches('\n').count();
                }
                Event::SoftBreak | Event::HardBreak => {
                    current_line += 1;
                    if let Some(section) = current.as_mut() {
                        section.body.push('\n');
                    }
                }
                Event::Start(Tag::Link { dest_url, .. }) => {
                    let owner = current.as_ref().map(|s| s.id.clone()).unwrap_or_else(|| doc_id.clone());
                    let edge_type = if dest_url.ends_with(".png")
                        || dest_url.ends_with(".jpg")
                        || dest_url.ends_with(".jpeg")
                        || dest_url.ends_with(".gif")
                    {
                        "REFERENCES_IMAGE"
                    } else {
                        "LINKS_TO"
                    };
                    relationships.push(ParsedRelationship::unresolved(
                        edge_type,
                        owner,
                        "MarkdownDocument",
                        dest_url.to_string(),
                    ));
                }
                _ => {}
            }
        }
        if let Some(finished) = current.take() {
            sections.push(finished);
        }

        for section in sections {
            extract_wikilinks(&section.id, &section.body, &mut relationships);
            let mut props = serde_json::Map::new();
            props.insert("_name".into(), serde_json::json!(section.title));
            props.insert("_content".into(), serde_json::json!(section.body));
            props.insert("level".into(), serde_json::json!(section.level));
            props.insert("startLine".into(), serde_json::json!(section.start_line));
            nodes.push(ParsedNode {
                id: section.id.clone(),
                labels: vec!["MarkdownSection".to_string()],
                properties: props.into_iter().collect(),
            });
            match &section.parent_id {
                Some(parent) => {
                    relationships.push(ParsedRelationship::resolved("CHILD_OF", section.id.clone(), parent.clone()));
                }
                None => {
                    relationships.push(ParsedRelationship::resolved("HAS_SECTION", doc_id.clone(), section.id.clone()));
                }
            }
        }

        Ok(ParsedGraph {
            nodes,
            relationships,
            metadata: Default::default(),
        })
    }
}
