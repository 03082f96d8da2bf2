use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

/// A line-bounded slice of a node's content view, with absolute line
/// numbers reconciled against the parent node's `startLine` (spec.md
/// §4.6/§4.9): `absolute_start = parent_start_line + in_content_offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: usize,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

static TOKENIZER: OnceLock<CoreBPE> = OnceLock::new();

fn get_tokenizer() -> &'static CoreBPE {
    TOKENIZER.get_or_init(|| tiktoken_rs::cl100k_base().expect("failed to load cl100k_base tokenizer"))
}

/// Count the number of tokens in the given text using the cl100k_base tokenizer.
pub fn count_tokens(text: &str) -> usize {
    get_tokenizer().encode_ordinary(text).len()
}

/// Split `content` into line-bounded chunks of at most `max_chars`
/// characters and `max_lines` lines, whichever is hit first, with
/// `overlap_lines` of repeated context between consecutive chunks.
/// Content under `min_chars` is never split (returned as one chunk with
/// index 0) — chunking a caption or one-line docstring buys nothing.
/// `parent_start_line` is the 1-based line the content begins at within
/// its source file; returned spans carry absolute line numbers.
pub fn chunk_text(
    content: &str,
    parent_start_line: usize,
    max_chars: usize,
    max_lines: usize,
    overlap_lines: usize,
    min_chars: usize,
) -> Vec<ChunkSpan> {
    if content.len() <= min_chars || content.is_empty() {
        return vec![ChunkSpan {
            index: 0,
            content: content.to_string(),
            start_line: parent_start_line,
            end_line: parent_start_line + content.lines().count().saturating_sub(1),
        }];
    }

    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= max_lines && content.len() <= max_chars {
        return vec![ChunkSpan {
            index: 0,
            content: content.to_string(),
            start_line: parent_start_line,
            end_line: parent_start_line + lines.len().saturating_sub(1),
        }];
    }

    let mut spans = Vec::new();
    let mut cursor = 0usize;
    let mut index = 0usize;

    while cursor < lines.len() {
        let mut end = cursor;
        let mut char_count = 0usize;
        while end < lines.len() {
            let next_len = lines[end].len() + 1;
            if end > cursor && (char_count + next_len > max_chars || end - cursor >= max_lines) {
                break;
            }
            char_count += next_len;
            end += 1;
        }
        // guarantee forward progress even if a single line exceeds max_chars
        if end == cursor {
            end = cursor + 1;
        }

        let slice = &lines[cursor..end];
        spans.push(ChunkSpan {
            index,
            content: slice.join("\n"),
            start_line: parent_start_line + cursor,
            end_line: parent_start_line + end.saturating_sub(1),
        });

        index += 1;
        if end >= lines.len() {
            break;
        }
        cursor = end.saturating_sub(overlap_lines).max(cursor + 1);
    }

    spans
}
