//! Block segmentation: scans source text into an ordered sequence of
//! paragraph/heading/code/list/table blocks, tracking a heading stack so
//! each block can be tagged with its nearest heading and full
//! `section_path` (spec §4.2 step 2).

use std::sync::OnceLock;

use regex::Regex;

use super::types::{ChunkMetadata, JsonBlockInput};

/// A single atomic unit considered by the greedy packer. Blocks are never
/// reordered; they're the document scanned into pieces, in document order.
#[derive(Debug, Clone)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
    pub heading: Option<String>,
    pub section_path: Vec<String>,
    pub page_number: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading,
    Paragraph,
    FencedCode,
    ListItem,
    Table,
}

impl Block {
    pub fn metadata_seed(&self) -> ChunkMetadata {
        ChunkMetadata {
            heading: self.heading.clone(),
            section_path: self.section_path.clone(),
            page_number: self.page_number,
            total_chunks: 0,
        }
    }
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.*\S)\s*$").unwrap())
}

fn page_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:<!--\s*page[:=]?\s*(\d+)\s*-->|\[page[:=]?\s*(\d+)\])\s*$").unwrap()
    })
}

fn list_item_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+\S").unwrap())
}

/// Scans raw Markdown into an ordered list of [`Block`]s.
///
/// Fenced code blocks (delimited by matching ``` or ~~~ fences) are kept
/// intact as a single block regardless of their internal content. Headings
/// update a level-indexed stack that produces each subsequent block's
/// `section_path`. A line that is only a page marker (`<!-- page: N -->` or
/// `[page N]`) sets the page number context for following blocks without
/// itself becoming a block.
pub fn segment_markdown(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut heading_stack: Vec<(u8, String)> = Vec::new();
    let mut page_number: Option<u32> = None;

    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0usize;
    let mut paragraph_buf: Vec<&str> = Vec::new();

    macro_rules! flush_paragraph {
        ($kind:expr) => {
            if !paragraph_buf.is_empty() {
                let joined = paragraph_buf.join("\n");
                if !joined.trim().is_empty() {
                    blocks.push(make_block($kind, joined, &heading_stack, page_number));
                }
                paragraph_buf.clear();
            }
        };
    }

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush_paragraph!(current_kind(&paragraph_buf));
            i += 1;
            continue;
        }

        if let Some(caps) = page_marker_regex().captures(trimmed) {
            let num = caps
                .get(1)
                .or_else(|| caps.get(2))
                .and_then(|m| m.as_str().parse::<u32>().ok());
            if num.is_some() {
                flush_paragraph!(current_kind(&paragraph_buf));
                page_number = num;
                i += 1;
                continue;
            }
        }

        if let Some(caps) = heading_regex().captures(trimmed) {
            flush_paragraph!(current_kind(&paragraph_buf));
            let level = caps[1].len() as u8;
            let title = caps[2].to_string();
            heading_stack.retain(|(lvl, _)| *lvl < level);
            heading_stack.push((level, title.clone()));
            blocks.push(Block {
                kind: BlockKind::Heading,
                text: line.to_string(),
                heading: Some(title),
                section_path: heading_stack.iter().map(|(_, t)| t.clone()).collect(),
                page_number,
            });
            i += 1;
            continue;
        }

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            flush_paragraph!(current_kind(&paragraph_buf));
            let fence = &trimmed[..3];
            let mut code_lines = vec![line];
            i += 1;
            while i < lines.len() && !lines[i].trim_start().starts_with(fence) {
                code_lines.push(lines[i]);
                i += 1;
            }
            if i < lines.len() {
                code_lines.push(lines[i]);
                i += 1;
            }
            blocks.push(make_block(
                BlockKind::FencedCode,
                code_lines.join("\n"),
                &heading_stack,
                page_number,
            ));
            continue;
        }

        if paragraph_buf.is_empty() && list_item_regex().is_match(line) {
            paragraph_buf.push(line);
            i += 1;
            // A list item block continues while lines are non-blank and not a new block type.
            while i < lines.len()
                && !lines[i].trim().is_empty()
                && heading_regex().captures(lines[i].trim()).is_none()
                && !lines[i].trim_start().starts_with("```")
                && !lines[i].trim_start().starts_with("~~~")
            {
                paragraph_buf.push(lines[i]);
                i += 1;
            }
            flush_paragraph!(BlockKind::ListItem);
            continue;
        }

        if trimmed.contains('|') && trimmed.starts_with('|') {
            paragraph_buf.push(line);
            i += 1;
            while i < lines.len() && lines[i].trim_start().starts_with('|') {
                paragraph_buf.push(lines[i]);
                i += 1;
            }
            flush_paragraph!(BlockKind::Table);
            continue;
        }

        paragraph_buf.push(line);
        i += 1;
    }
    flush_paragraph!(current_kind(&paragraph_buf));

    blocks
}

fn current_kind(_buf: &[&str]) -> BlockKind {
    BlockKind::Paragraph
}

fn make_block(
    kind: BlockKind,
    text: String,
    heading_stack: &[(u8, String)],
    page_number: Option<u32>,
) -> Block {
    Block {
        kind,
        text,
        heading: heading_stack.last().map(|(_, t)| t.clone()),
        section_path: heading_stack.iter().map(|(_, t)| t.clone()).collect(),
        page_number,
    }
}

/// Converts pre-segmented `json-blocks` input directly into [`Block`]s,
/// skipping the textual scan entirely (spec §4.2, final paragraph).
pub fn blocks_from_json(input: Vec<JsonBlockInput>) -> Vec<Block> {
    let mut heading_stack: Vec<String> = Vec::new();
    input
        .into_iter()
        .map(|block| {
            if let Some(heading) = &block.heading {
                heading_stack.push(heading.clone());
            }
            Block {
                kind: if block.heading.is_some() { BlockKind::Heading } else { BlockKind::Paragraph },
                text: block.text,
                heading: block.heading.clone(),
                section_path: heading_stack.clone(),
                page_number: block.page_number,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_heading_hierarchy() {
        let text = "# Intro\nRAG combines retrieval with generation.\n\n# Details\nIt reduces hallucinations.\n";
        let blocks = segment_markdown(text);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].kind, BlockKind::Heading);
        assert_eq!(blocks[1].heading.as_deref(), Some("Intro"));
        assert_eq!(blocks[3].heading.as_deref(), Some("Details"));
    }

    #[test]
    fn keeps_fenced_code_intact() {
        let text = "# Title\n```rust\nfn x() {\n  a\n\n  b\n}\n```\nafter\n";
        let blocks = segment_markdown(text);
        let code = blocks.iter().find(|b| b.kind == BlockKind::FencedCode).unwrap();
        assert!(code.text.contains("fn x()"));
        assert!(code.text.contains("```"));
    }

    #[test]
    fn page_marker_tags_following_blocks() {
        let text = "intro text\n\n<!-- page: 2 -->\n\nsecond page text\n";
        let blocks = segment_markdown(text);
        assert_eq!(blocks[0].page_number, None);
        assert_eq!(blocks[1].page_number, Some(2));
    }
}
