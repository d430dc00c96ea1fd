//! Query orchestrator (spec §4.8): the glue between retrieval and
//! generation for a single `/query` call.
//!
//! Prompt construction is lifted into [`build_prompt`], a pure function
//! independent of the retriever/generator/network, per the spec's closing
//! note on §4.8 and the redesign flag against scattering prompt text across
//! string concatenation at call sites.

use std::sync::Arc;

use serde::Serialize;

use crate::config::ConfigSnapshot;
use crate::error::Result;
use crate::generation::Generator;
use crate::retriever::{RetrievalHit, Retriever};

/// Stock answer returned when retrieval finds nothing worth grounding a
/// generation call in (spec §4.8 step 2, §8 scenario 2).
pub const INSUFFICIENT_CONTEXT_ANSWER: &str = "The provided documents do not contain information about this topic.";

/// A single retrieved chunk projected down to what a caller needs to show
/// provenance without re-fetching the full text (spec §3, `sources[i]`).
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub doc_id: String,
    pub chunk_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    pub similarity: f32,
    pub excerpt: String,
}

/// Final answer to a query, including the hits it was grounded in (spec §3,
/// `QueryResult`).
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub query: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub confidence: f32,
    pub model_id: String,
    pub tokens_generated: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieved_chunks: Option<Vec<String>>,
}

/// Per-call knobs a caller may override on top of the config snapshot (spec
/// §4.8, `options = { top_k, include_chunks }`).
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub top_k: Option<usize>,
    pub include_chunks: bool,
}

pub struct QueryOrchestrator {
    retriever: Retriever,
    generator: Arc<dyn Generator>,
}

impl QueryOrchestrator {
    pub fn new(retriever: Retriever, generator: Arc<dyn Generator>) -> Self {
        Self { retriever, generator }
    }

    /// Answers `query` against the currently indexed collection.
    ///
    /// When retrieval comes back empty (or everything falls under
    /// `similarity_threshold`), the orchestrator short-circuits with a
    /// stock refusal instead of calling the generator on an empty context,
    /// per spec §8's "insufficient context" scenario.
    pub async fn answer(&self, query: &str, config: &ConfigSnapshot, options: &QueryOptions) -> Result<QueryResult> {
        let hits = self.retriever.retrieve(query, config, options.top_k).await?;

        if hits.is_empty() {
            return Ok(QueryResult {
                query: query.to_string(),
                answer: INSUFFICIENT_CONTEXT_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: 0.0,
                model_id: self.generator.model_id().to_string(),
                tokens_generated: 0,
                retrieved_chunks: None,
            });
        }

        let prompt = build_prompt(query, &hits, config);
        let generated = self.generator.generate(&prompt, config.temperature, config.max_tokens).await?;
        let confidence = max_similarity(&hits);
        let sources = hits.iter().map(to_source_ref).collect();
        let retrieved_chunks =
            options.include_chunks.then(|| hits.iter().map(|h| h.text.clone()).collect::<Vec<_>>());

        Ok(QueryResult {
            query: query.to_string(),
            answer: generated.text,
            sources,
            confidence,
            model_id: self.generator.model_id().to_string(),
            tokens_generated: generated.tokens_generated,
            retrieved_chunks,
        })
    }
}

fn to_source_ref(hit: &RetrievalHit) -> SourceRef {
    let excerpt: String = hit.text.chars().take(200).collect();
    SourceRef {
        doc_id: hit.doc_id.clone(),
        chunk_index: hit.chunk_index,
        heading: hit.metadata.heading.clone(),
        similarity: hit.similarity,
        excerpt,
    }
}

/// Confidence law (spec §8): `result.confidence == max(hit.similarity)` over
/// the returned hits, clamped to `[0, 1]`.
fn max_similarity(hits: &[RetrievalHit]) -> f32 {
    hits.iter().map(|h| h.similarity).fold(0.0f32, f32::max).clamp(0.0, 1.0)
}

/// Builds the grounded-answer prompt from a query and its retrieved context
/// (spec §4.8 step 3): a system instruction, a numbered context block
/// (`[Source i]: <text>` per hit, descending similarity order), a user block
/// with the raw query, and an answer cue.
///
/// Each hit is truncated to `context_chunk_chars` characters before being
/// folded in, and hits are dropped from the end once the running prompt
/// would exceed `context_window` tokens. Pure and independently testable:
/// no I/O, no randomness.
pub fn build_prompt(query: &str, hits: &[RetrievalHit], config: &ConfigSnapshot) -> String {
    const SYSTEM_INSTRUCTION: &str = "You must answer using only the context sources below. Do not use outside \
         knowledge. If the context does not contain the answer, say plainly that you do not know.";

    let mut context_blocks = Vec::new();
    let mut running_tokens = crate::chunking::estimate_tokens(query) + crate::chunking::estimate_tokens(SYSTEM_INSTRUCTION);

    for (i, hit) in hits.iter().enumerate() {
        let truncated = truncate_chars(&hit.text, config.context_chunk_chars);
        let block = format!("[Source {}]: {}", i + 1, truncated);
        let block_tokens = crate::chunking::estimate_tokens(&block);
        if running_tokens + block_tokens > config.context_window && !context_blocks.is_empty() {
            break;
        }
        running_tokens += block_tokens;
        context_blocks.push(block);
    }

    let context = context_blocks.join("\n\n");
    format!("{SYSTEM_INSTRUCTION}\n\nContext:\n{context}\n\nQuestion: {query}\n\nAnswer:")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkMetadata;

    fn hit(doc_id: &str, text: &str, similarity: f32) -> RetrievalHit {
        RetrievalHit {
            chunk_id: format!("{doc_id}-0"),
            doc_id: doc_id.to_string(),
            chunk_index: 0,
            text: text.to_string(),
            similarity,
            metadata: ChunkMetadata { heading: Some("Intro".to_string()), ..Default::default() },
        }
    }

    #[test]
    fn prompt_includes_question_and_context() {
        let config = ConfigSnapshot::default();
        let hits = vec![hit("doc-1", "RAG grounds answers in retrieved text.", 0.9)];
        let prompt = build_prompt("What is RAG?", &hits, &config);
        assert!(prompt.contains("What is RAG?"));
        assert!(prompt.contains("RAG grounds answers"));
        assert!(prompt.contains("[Source 1]"));
    }

    #[test]
    fn prompt_truncates_long_context_chunks() {
        let mut config = ConfigSnapshot::default();
        config.context_chunk_chars = 10;
        let hits = vec![hit("doc-1", "this text is definitely longer than ten characters", 0.9)];
        let prompt = build_prompt("q", &hits, &config);
        assert!(prompt.contains("this text ..."));
        assert!(!prompt.contains("definitely"));
    }

    #[test]
    fn prompt_drops_trailing_hits_once_context_window_is_exceeded() {
        let mut config = ConfigSnapshot::default();
        config.context_window = 20;
        config.context_chunk_chars = 4000;
        let big_text = "word ".repeat(100);
        let hits = vec![hit("doc-1", &big_text, 0.9), hit("doc-2", &big_text, 0.8)];
        let prompt = build_prompt("q", &hits, &config);
        assert!(prompt.contains("[Source 1]"));
        assert!(!prompt.contains("[Source 2]"));
    }

    #[test]
    fn confidence_is_max_similarity_not_average() {
        let hits = vec![hit("doc-1", "a", 0.4), hit("doc-2", "b", 0.9), hit("doc-3", "c", 0.6)];
        assert_eq!(max_similarity(&hits), 0.9);
        assert_eq!(max_similarity(&[]), 0.0);
    }

    #[test]
    fn prompt_is_deterministic() {
        let config = ConfigSnapshot::default();
        let hits = vec![hit("doc-1", "some context", 0.5)];
        assert_eq!(build_prompt("q", &hits, &config), build_prompt("q", &hits, &config));
    }
}
