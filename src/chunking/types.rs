//! Data types shared by the chunker and everything downstream of it.

use serde::{Deserialize, Serialize};

/// MIME-ish kind of a source document, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentKind {
    Markdown,
    JsonBlocks,
}

/// Fixed metadata record attached to every chunk (spec §9: replaces ad-hoc
/// dict-shaped metadata with a closed record).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Nearest enclosing heading at the chunk's start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    /// Ancestor headings, outermost first.
    #[serde(default)]
    pub section_path: Vec<String>,
    /// Earliest page number encountered in the chunk, if the source carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// Total number of chunks produced for the owning document. Filled in
    /// only once the whole document has been chunked.
    #[serde(default)]
    pub total_chunks: usize,
}

/// The unit of retrieval: a bounded, metadata-tagged text span.
///
/// `embedding` is `None` until the indexing pipeline attaches a vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic from `(doc_id, chunk_index, content_hash)`.
    pub chunk_id: String,
    pub doc_id: String,
    /// 0-based position within the document.
    pub chunk_index: usize,
    pub text: String,
    pub token_estimate: usize,
    pub metadata: ChunkMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// One pre-segmented block of a `json-blocks` document (spec §4.2, final
/// paragraph): the caller has already split the document; the chunker only
/// packs, applies overlap, and fills in metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonBlockInput {
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub page_number: Option<u32>,
    pub text: String,
}
