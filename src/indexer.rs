//! Indexer (spec §4.5, §5): chunks a document, embeds the chunks, and writes
//! them into the vector store, replacing any chunks the same `doc_id` had
//! from a previous call.
//!
//! Concurrency: two `index` calls for different `doc_id`s run fully in
//! parallel; two calls for the *same* `doc_id` serialize on a per-document
//! lock so a slow re-index can't interleave with a concurrent one and leave
//! the store with a mix of old and new chunks. Grounded in
//! `ResumeTracker`'s `Arc<Mutex<HashSet<String>>>` discipline, generalized
//! from "one global set" to "one lock per key".

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::chunking::{self, Chunk, DocumentKind, JsonBlockInput};
use crate::config::ConfigSnapshot;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::stores::VectorStore;

/// Outcome of a single `index` call (spec §4.5 step 5).
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexReport {
    pub doc_id: String,
    pub chunks_created: usize,
    pub bytes_in: usize,
    pub elapsed_ms: u128,
}

struct DocLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DocLocks {
    fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, doc_id: &str) -> Arc<Mutex<()>> {
        let mut table = self.locks.lock().await;
        table.entry(doc_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// Owns the embedder and vector store needed to turn a document into stored,
/// searchable chunks.
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    doc_locks: DocLocks,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store, doc_locks: DocLocks::new() }
    }

    /// Chunks, embeds, and stores `text` (or `json_blocks`, for
    /// [`DocumentKind::JsonBlocks`]) under `doc_id`, replacing any chunks
    /// previously stored for that document (spec §4.5).
    ///
    /// If `clear_existing`, the whole collection is wiped before chunking
    /// starts, ahead of any other work (step 1). Failure at any stage before
    /// the final upsert leaves the store untouched for this document: chunks
    /// are only written once every one of them has an embedding.
    pub async fn index_document(
        &self,
        doc_id: &str,
        kind: DocumentKind,
        text: &str,
        json_blocks: Option<Vec<JsonBlockInput>>,
        clear_existing: bool,
        config: &ConfigSnapshot,
    ) -> Result<IndexReport> {
        let started = std::time::Instant::now();
        let doc_lock = self.doc_locks.lock_for(doc_id).await;
        let _guard = doc_lock.lock().await;

        if clear_existing {
            self.store.clear().await?;
        }

        let bytes_in = text.len();
        let chunks = chunking::chunk_document(doc_id, kind, text, json_blocks, config)?;

        let mut embedded = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(config.embed_batch_size.max(1)) {
            let batch_texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&batch_texts).await?;
            for (chunk, vector) in batch.iter().cloned().zip(vectors) {
                embedded.push(Chunk { embedding: Some(vector), ..chunk });
            }
        }

        self.store.delete(doc_id).await?;
        let chunks_created = embedded.len();
        self.store.upsert(embedded).await?;

        let elapsed_ms = started.elapsed().as_millis();
        tracing::info!(doc_id, chunks_created, elapsed_ms, "document indexed");

        Ok(IndexReport { doc_id: doc_id.to_string(), chunks_created, bytes_in, elapsed_ms })
    }
}
