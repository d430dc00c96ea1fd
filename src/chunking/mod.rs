//! Deterministic, heading-aware document chunking (spec §4.2).
//!
//! Chunking never calls out to a model: the same document and the same
//! [`ConfigSnapshot`] always produce bit-identical chunks and `chunk_id`s.
//! This is what lets a caller safely re-index a document and expect
//! `VectorStore::upsert` to replace rather than duplicate its chunks.

pub mod segmenter;
pub mod types;

use std::sync::OnceLock;

use regex::Regex;

use crate::config::ConfigSnapshot;
use crate::error::{RagError, Result};

pub use types::{Chunk, ChunkMetadata, DocumentKind, JsonBlockInput};

use segmenter::{Block, BlockKind};

/// How far (as a fraction of `chunk_size`) from the token budget a heading
/// is allowed to sit before the packer defers it to the next chunk, so a
/// chunk doesn't end with an orphaned heading and nothing under it.
const HEADING_DEFER_FRACTION: f64 = 0.2;

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}]+)?").unwrap())
}

fn sentence_end_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?](?:\s+|$)").unwrap())
}

/// Approximates a tokenizer by counting word-like runs. Good enough for
/// budget enforcement; not meant to match any specific model's tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    word_regex().find_iter(text).count()
}

/// Splits `text` into the longest prefix under `budget_tokens`, a sentence
/// boundary if one exists inside the prefix, and the remainder. Falls back
/// to a whitespace boundary, then a hard byte truncation if neither a
/// sentence nor a word boundary fits.
fn split_to_budget(text: &str, budget_tokens: usize, max_bytes: usize) -> (String, String) {
    if estimate_tokens(text) <= budget_tokens {
        return (text.to_string(), String::new());
    }

    let mut best_sentence_cut: Option<usize> = None;
    let mut running_tokens = 0usize;
    for m in sentence_end_regex().find_iter(text) {
        let prefix = &text[..m.end()];
        let tokens = estimate_tokens(prefix);
        if tokens <= budget_tokens {
            best_sentence_cut = Some(m.end());
            running_tokens = tokens;
        } else {
            break;
        }
    }
    if let Some(cut) = best_sentence_cut {
        if running_tokens > 0 {
            return (text[..cut].trim_end().to_string(), text[cut..].trim_start().to_string());
        }
    }

    let mut best_word_cut: Option<usize> = None;
    for m in word_regex().find_iter(text) {
        let prefix = &text[..m.end()];
        if estimate_tokens(prefix) <= budget_tokens {
            best_word_cut = Some(m.end());
        } else {
            break;
        }
    }
    if let Some(cut) = best_word_cut {
        if cut > 0 {
            return (text[..cut].to_string(), text[cut..].trim_start().to_string());
        }
    }

    tracing::warn!(max_bytes, "chunk text exceeds budget with no usable boundary, hard-truncating");
    let mut end = max_bytes.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    (text[..end].to_string(), text[end..].to_string())
}

/// Takes the trailing `overlap_tokens` worth of `text`, rounded outward to
/// the nearest sentence boundary so the next chunk doesn't open mid-sentence.
fn trailing_overlap(text: &str, overlap_tokens: usize) -> String {
    if overlap_tokens == 0 {
        return String::new();
    }
    let total = estimate_tokens(text);
    if total <= overlap_tokens {
        return text.to_string();
    }

    let starts: Vec<usize> = sentence_end_regex()
        .find_iter(text)
        .map(|m| m.end())
        .chain(std::iter::once(0))
        .collect();
    let mut best_start = text.len();
    for &start in &starts {
        if start >= text.len() {
            continue;
        }
        let suffix = &text[start..];
        if estimate_tokens(suffix) >= overlap_tokens.min(total) {
            best_start = start;
        } else {
            break;
        }
    }
    text[best_start.min(text.len())..].trim_start().to_string()
}

fn chunk_id(doc_id: &str, chunk_index: usize, content: &str) -> String {
    let mut input = String::with_capacity(doc_id.len() + content.len() + 20);
    input.push_str(doc_id);
    input.push('\0');
    input.push_str(&chunk_index.to_string());
    input.push('\0');
    input.push_str(content);
    let digest = blake3::hash(input.as_bytes());
    digest.to_hex()[..32].to_string()
}

struct PendingChunk {
    blocks_text: Vec<String>,
    metadata: Option<ChunkMetadata>,
    tokens: usize,
}

impl PendingChunk {
    fn new() -> Self {
        Self { blocks_text: Vec::new(), metadata: None, tokens: 0 }
    }

    fn is_empty(&self) -> bool {
        self.blocks_text.is_empty()
    }

    fn push(&mut self, block: &Block, tokens: usize) {
        if self.metadata.is_none() {
            self.metadata = Some(block.metadata_seed());
        }
        self.blocks_text.push(block.text.clone());
        self.tokens += tokens;
    }

    fn raw_text(&self) -> String {
        self.blocks_text.join("\n\n")
    }
}

/// Packs a flat block stream into token-budgeted [`Chunk`]s, per spec §4.2
/// steps 3-5: greedy accumulation up to `chunk_size`, heading-boundary
/// preference, oversized-block splitting, and trailing-token overlap
/// carried from each chunk into the next.
fn pack_blocks(blocks: Vec<Block>, config: &ConfigSnapshot, doc_id: &str) -> Result<Vec<Chunk>> {
    if blocks.iter().all(|b| b.text.trim().is_empty()) {
        return Err(RagError::EmptyDocument);
    }

    let budget = config.chunk_size;
    let defer_margin = ((budget as f64) * HEADING_DEFER_FRACTION).round() as usize;
    let max_bytes = config.max_chunk_bytes();

    let mut chunks_raw: Vec<(String, ChunkMetadata)> = Vec::new();
    let mut current = PendingChunk::new();
    let mut carry_overlap = String::new();

    let mut flush = |current: &mut PendingChunk, chunks_raw: &mut Vec<(String, ChunkMetadata)>| {
        if current.is_empty() {
            return;
        }
        let metadata = current.metadata.take().unwrap_or_default();
        chunks_raw.push((current.raw_text(), metadata));
        *current = PendingChunk::new();
    };

    for block in blocks {
        if block.text.trim().is_empty() {
            continue;
        }
        let block_tokens = estimate_tokens(&block.text);

        if block.kind == BlockKind::Heading
            && !current.is_empty()
            && current.tokens + block_tokens > budget.saturating_sub(defer_margin)
        {
            flush(&mut current, &mut chunks_raw);
        }

        if block_tokens > budget {
            if !current.is_empty() {
                flush(&mut current, &mut chunks_raw);
            }
            let mut remaining = block.text.clone();
            while !remaining.trim().is_empty() {
                let (piece, rest) = split_to_budget(&remaining, budget, max_bytes);
                if piece.is_empty() {
                    break;
                }
                let mut solo = PendingChunk::new();
                let synthetic = Block {
                    kind: block.kind,
                    text: piece,
                    heading: block.heading.clone(),
                    section_path: block.section_path.clone(),
                    page_number: block.page_number,
                };
                let tokens = estimate_tokens(&synthetic.text);
                solo.push(&synthetic, tokens);
                flush(&mut solo, &mut chunks_raw);
                remaining = rest;
            }
            continue;
        }

        if current.tokens + block_tokens > budget && !current.is_empty() {
            flush(&mut current, &mut chunks_raw);
        }
        current.push(&block, block_tokens);
    }
    flush(&mut current, &mut chunks_raw);

    if chunks_raw.is_empty() {
        return Err(RagError::EmptyDocument);
    }

    let chunks_raw = merge_undersized_chunks(chunks_raw, config.min_chunk_size);

    let mut chunks = Vec::with_capacity(chunks_raw.len());
    let total = chunks_raw.len();
    for (index, (raw_text, metadata)) in chunks_raw.into_iter().enumerate() {
        let text = if carry_overlap.is_empty() {
            raw_text.clone()
        } else {
            format!("{carry_overlap}\n\n{raw_text}")
        };
        carry_overlap = trailing_overlap(&raw_text, config.chunk_overlap);

        let token_estimate = estimate_tokens(&text);
        let mut metadata = metadata;
        metadata.total_chunks = total;
        let id = chunk_id(doc_id, index, &text);

        chunks.push(Chunk {
            chunk_id: id,
            doc_id: doc_id.to_string(),
            chunk_index: index,
            text,
            token_estimate,
            metadata,
            embedding: None,
        });
    }

    Ok(chunks)
}

/// Folds any non-final chunk under `min_chunk_size` into its successor
/// (spec §8: every chunk but possibly the last must sit in
/// `min_chunk_size..=chunk_size`). Greedy packing alone can't guarantee this
/// on its own: a heading-only flush or a short trailing block ahead of a
/// normal-sized one can leave a tiny chunk stranded by itself.
fn merge_undersized_chunks(
    chunks_raw: Vec<(String, ChunkMetadata)>,
    min_chunk_size: usize,
) -> Vec<(String, ChunkMetadata)> {
    let last = chunks_raw.len().saturating_sub(1);
    let mut merged: Vec<(String, ChunkMetadata)> = Vec::with_capacity(chunks_raw.len());
    let mut pending: Option<(String, ChunkMetadata)> = None;

    for (index, (text, metadata)) in chunks_raw.into_iter().enumerate() {
        let (text, metadata) = match pending.take() {
            Some((pending_text, pending_metadata)) => (format!("{pending_text}\n\n{text}"), pending_metadata),
            None => (text, metadata),
        };
        if index != last && estimate_tokens(&text) < min_chunk_size {
            pending = Some((text, metadata));
        } else {
            merged.push((text, metadata));
        }
    }
    if let Some((text, metadata)) = pending {
        match merged.last_mut() {
            Some(prev) => prev.0 = format!("{}\n\n{text}", prev.0),
            None => merged.push((text, metadata)),
        }
    }
    merged
}

/// Chunks a Markdown document.
pub fn chunk_markdown(doc_id: &str, text: &str, config: &ConfigSnapshot) -> Result<Vec<Chunk>> {
    let blocks = segmenter::segment_markdown(text);
    pack_blocks(blocks, config, doc_id)
}

/// Chunks a document already split into blocks by the caller (spec §4.2,
/// `json-blocks` document kind).
pub fn chunk_json_blocks(
    doc_id: &str,
    input: Vec<JsonBlockInput>,
    config: &ConfigSnapshot,
) -> Result<Vec<Chunk>> {
    let blocks = segmenter::blocks_from_json(input);
    pack_blocks(blocks, config, doc_id)
}

/// Dispatches on [`DocumentKind`]. `json_blocks` is required (and `text` is
/// ignored) when `kind` is [`DocumentKind::JsonBlocks`].
pub fn chunk_document(
    doc_id: &str,
    kind: DocumentKind,
    text: &str,
    json_blocks: Option<Vec<JsonBlockInput>>,
    config: &ConfigSnapshot,
) -> Result<Vec<Chunk>> {
    match kind {
        DocumentKind::Markdown => chunk_markdown(doc_id, text, config),
        DocumentKind::JsonBlocks => {
            let blocks = json_blocks.ok_or_else(|| {
                RagError::Validation("json-blocks document requires json_blocks input".to_string())
            })?;
            chunk_json_blocks(doc_id, blocks, config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConfigSnapshot {
        let mut c = ConfigSnapshot::default();
        c.chunk_size = 200;
        c.chunk_overlap = 30;
        c.min_chunk_size = 50;
        c
    }

    fn long_paragraph(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("This is sentence number {i} in a long paragraph about retrieval."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = format!("# Intro\n{}\n\n# Details\n{}\n", long_paragraph(20), long_paragraph(20));
        let cfg = config();
        let a = chunk_markdown("doc-1", &text, &cfg).unwrap();
        let b = chunk_markdown("doc-1", &text, &cfg).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.chunk_id, y.chunk_id);
            assert_eq!(x.text, y.text);
        }
    }

    #[test]
    fn produces_multiple_chunks_for_long_document() {
        let text = format!("# Intro\n{}\n\n# Details\n{}\n", long_paragraph(30), long_paragraph(30));
        let cfg = config();
        let chunks = chunk_markdown("doc-2", &text, &cfg).unwrap();
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert_eq!(c.metadata.total_chunks, chunks.len());
        }
    }

    #[test]
    fn consecutive_chunks_share_overlap_text() {
        let text = format!("# Intro\n{}\n", long_paragraph(40));
        let cfg = config();
        let chunks = chunk_markdown("doc-3", &text, &cfg).unwrap();
        assert!(chunks.len() >= 2);
        let tail_of_first: Vec<&str> = chunks[0].text.split_whitespace().rev().take(3).collect();
        for word in tail_of_first {
            assert!(
                chunks[1].text.contains(word),
                "expected overlap word {word:?} to carry into next chunk"
            );
        }
    }

    #[test]
    fn empty_document_errors() {
        let cfg = config();
        let err = chunk_markdown("doc-empty", "\n\n   \n", &cfg).unwrap_err();
        assert!(matches!(err, RagError::EmptyDocument));
    }

    #[test]
    fn oversized_block_is_split_without_exceeding_byte_cap() {
        let cfg = config();
        let huge = long_paragraph(400);
        let chunks = chunk_markdown("doc-huge", &huge, &cfg).unwrap();
        for c in &chunks {
            assert!(c.text.len() <= cfg.max_chunk_bytes() * 2);
        }
    }

    #[test]
    fn json_blocks_preserve_headings() {
        let cfg = config();
        let input = vec![
            JsonBlockInput { heading: Some("Overview".to_string()), page_number: Some(1), text: long_paragraph(10) },
            JsonBlockInput { heading: None, page_number: Some(1), text: long_paragraph(10) },
        ];
        let chunks = chunk_json_blocks("doc-json", input, &cfg).unwrap();
        assert_eq!(chunks[0].metadata.heading.as_deref(), Some("Overview"));
        assert_eq!(chunks[0].metadata.page_number, Some(1));
    }

    #[test]
    fn small_heading_only_chunk_merges_forward_instead_of_standing_alone() {
        let cfg = config();
        let near_budget = "retrieval ".repeat(200);
        let text = format!("# A\n{near_budget}\n\n# B\nShort closing remark here.\n");
        let chunks = chunk_markdown("doc-merge", &text, &cfg).unwrap();
        assert!(chunks.len() >= 2);
        for c in &chunks[..chunks.len() - 1] {
            assert!(
                c.token_estimate >= cfg.min_chunk_size,
                "non-final chunk {} fell under min_chunk_size: {} tokens",
                c.chunk_index,
                c.token_estimate
            );
        }
    }

    #[test]
    fn chunk_ids_differ_by_document() {
        let cfg = config();
        let text = format!("# Intro\n{}\n", long_paragraph(5));
        let a = chunk_markdown("doc-a", &text, &cfg).unwrap();
        let b = chunk_markdown("doc-b", &text, &cfg).unwrap();
        assert_ne!(a[0].chunk_id, b[0].chunk_id);
    }
}
