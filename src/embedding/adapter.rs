//! Bridges this crate's [`super::Embedder`] onto `rig`'s `EmbeddingModel`
//! trait, the shape `rig-sqlite`'s vector store is generic over (grounded in
//! `stores/sqlite.rs`'s `SqliteChunkStore<E: EmbeddingModel>` and the
//! `DemoEmbeddingModel` in the teacher's `rust_book_pipeline.rs` example).

use std::sync::Arc;

use rig::embeddings::embedding::{Embedding, EmbeddingError, EmbeddingModel};

use super::Embedder;

/// Wraps any `Arc<dyn Embedder>` so it can be handed to `SqliteVectorStore`.
#[derive(Clone)]
pub struct RigEmbedderAdapter {
    inner: Arc<dyn Embedder>,
}

impl RigEmbedderAdapter {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self { inner }
    }
}

impl EmbeddingModel for RigEmbedderAdapter {
    const MAX_DOCUMENTS: usize = 256;

    fn ndims(&self) -> usize {
        self.inner.dimension()
    }

    fn embed_texts(
        &self,
        texts: impl IntoIterator<Item = String> + Send,
    ) -> impl std::future::Future<Output = Result<Vec<Embedding>, EmbeddingError>> + Send {
        let inner = self.inner.clone();
        let docs: Vec<String> = texts.into_iter().collect();
        async move {
            let vectors = inner
                .embed(&docs)
                .await
                .map_err(|err| EmbeddingError::ProviderError(err.to_string()))?;
            Ok(docs
                .into_iter()
                .zip(vectors)
                .map(|(document, vector)| Embedding {
                    document,
                    vec: vector.into_iter().map(|v| v as f64).collect(),
                })
                .collect())
        }
    }
}
