//! Retriever (spec §4.6): embeds a query, searches the vector store, and
//! filters/orders the raw hits into the shape the orchestrator consumes.

use std::sync::Arc;

use serde::Serialize;

use crate::chunking::ChunkMetadata;
use crate::config::ConfigSnapshot;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::stores::VectorStore;

/// A single retrieved chunk, ready to be shown to a caller or folded into a
/// generator prompt (spec §3, `RetrievalHit`).
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub similarity: f32,
    pub metadata: ChunkMetadata,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Retrieves up to `top_k` hits for `query` (overriding `config.top_k`
    /// when `top_k_override` is given), dropping anything below
    /// `similarity_threshold` and deduplicating by `chunk_id` (a defensive
    /// measure against a backend returning the same row twice, spec §8).
    /// Ties in similarity break on `(doc_id, chunk_index)` so results are
    /// stable across runs against the same store.
    ///
    /// An empty result here is the orchestrator's sole signal to refuse
    /// (spec §4.8 step 2): a query whose best hit still falls below
    /// `similarity_threshold` must come back empty, not as a weak context
    /// the generator is left to second-guess.
    pub async fn retrieve(
        &self,
        query: &str,
        config: &ConfigSnapshot,
        top_k_override: Option<usize>,
    ) -> Result<Vec<RetrievalHit>> {
        let top_k = top_k_override.unwrap_or(config.top_k);
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        let query_embedding = vectors.into_iter().next().unwrap_or_default();

        let raw_hits = self.store.search(&query_embedding, top_k).await?;

        let mut seen = std::collections::HashSet::new();
        let mut hits: Vec<RetrievalHit> = raw_hits
            .into_iter()
            .filter(|hit| hit.similarity >= config.similarity_threshold)
            .filter(|hit| seen.insert(hit.chunk.chunk_id.clone()))
            .map(|hit| RetrievalHit {
                chunk_id: hit.chunk.chunk_id,
                doc_id: hit.chunk.doc_id,
                chunk_index: hit.chunk.chunk_index,
                text: hit.chunk.text,
                similarity: hit.similarity,
                metadata: hit.chunk.metadata,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (&a.doc_id, a.chunk_index).cmp(&(&b.doc_id, b.chunk_index)))
        });
        hits.truncate(top_k);

        Ok(hits)
    }
}
