//! Vector storage backends (spec §4.4).
//!
//! [`VectorStore`] generalizes the teacher's `Backend` trait: `upsert`
//! replaces `insert_chunks` (and is specified to replace rather than
//! duplicate rows sharing a `chunk_id`), `search` replaces `search_similar`,
//! and `clear`/`delete` are added so the control surface's `/clear` endpoint
//! and re-indexing have a direct primitive instead of going through raw SQL.

pub mod sqlite;

use async_trait::async_trait;

use crate::chunking::Chunk;
use crate::error::Result;

pub use sqlite::SqliteVectorStore;

/// A hit returned by [`VectorStore::search`]: a stored chunk plus its
/// similarity to the query (spec §3, `RetrievalHit`).
#[derive(Debug, Clone)]
pub struct StoredHit {
    pub chunk: Chunk,
    pub similarity: f32,
}

/// Database-agnostic interface for persisting and querying chunk vectors.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The fixed embedding dimensionality `D` this collection was opened
    /// with. `upsert` rejects any vector whose length differs.
    fn dimension(&self) -> usize;

    /// Inserts or replaces the given chunks. A chunk sharing an existing
    /// `chunk_id` overwrites the stored row (spec §4.5 replace-on-reindex).
    /// Rejects any chunk whose embedding length != [`VectorStore::dimension`]
    /// with [`crate::error::RagError::DimensionMismatch`].
    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<()>;

    /// Finds the `top_k` chunks most similar to `query_embedding`.
    async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<StoredHit>>;

    /// Removes every chunk belonging to `doc_id`, returning how many were removed.
    async fn delete(&self, doc_id: &str) -> Result<usize>;

    /// Removes every chunk in the collection.
    async fn clear(&self) -> Result<()>;

    /// Total number of chunks currently stored.
    async fn count(&self) -> Result<usize>;
}
