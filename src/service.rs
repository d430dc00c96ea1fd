//! Owns the four components a running collection needs: config, embedder,
//! vector store, generator. No hidden globals (spec §9 design note): every
//! handler in `api` reaches these only through a `Service` it was handed at
//! startup.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::chunking::{DocumentKind, JsonBlockInput};
use crate::config::{Config, ConfigSnapshot};
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::generation::Generator;
use crate::indexer::Indexer;
use crate::orchestrator::{QueryOptions, QueryOrchestrator, QueryResult};
use crate::retriever::Retriever;
use crate::stores::VectorStore;

/// Bumped whenever the deterministic chunking algorithm changes output,
/// letting operators tell a stale collection apart from a fresh one
/// (grounded in the pack's `mdit` indexer's `TARGET_CHUNKING_VERSION`).
pub const CHUNKING_VERSION: u32 = 1;

/// `/stats` response (spec §6.1): grouped by the subsystem each field
/// describes rather than one flat bag.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub vector_store: VectorStoreStats,
    pub embedding_model: EmbeddingModelStats,
    pub config: ConfigSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorStoreStats {
    pub collection_name: String,
    pub document_count: usize,
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingModelStats {
    pub model_name: String,
    pub embedding_dimension: usize,
    pub device: &'static str,
}

/// `/health` response (spec §6.1, §4.9 `Health()`).
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub rag_enabled: bool,
    pub embeddings_model_available: bool,
    pub vector_store_ready: bool,
    pub generator_available: bool,
    pub message: String,
}

/// Response body for `POST /index` (spec §6.1).
#[derive(Debug, Clone, Serialize)]
pub struct IndexFileResponse {
    pub status: &'static str,
    pub filename: String,
    pub chunks_created: usize,
    pub message: String,
}

/// Response body for `POST /clear` (spec §6.1).
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub status: &'static str,
    pub message: String,
}

pub struct Service {
    config: Config,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn Generator>,
    indexer: Indexer,
    orchestrator: QueryOrchestrator,
}

impl Service {
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let indexer = Indexer::new(embedder.clone(), store.clone());
        let retriever = Retriever::new(embedder.clone(), store.clone());
        let orchestrator = QueryOrchestrator::new(retriever, generator.clone());
        Self { config, embedder, store, generator, indexer, orchestrator }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reads `file_path` from disk, infers its [`DocumentKind`] from the
    /// extension, and indexes it under a `doc_id` derived from the file
    /// name (spec §4.9 `Index(file_path, clear_existing)`).
    ///
    /// Fails with [`RagError::NotFound`] if the file does not exist (404 at
    /// the control surface) and [`RagError::Disabled`] if the service's
    /// master switch is off (503).
    pub async fn index_file(&self, file_path: &str, clear_existing: bool) -> Result<IndexFileResponse> {
        let snapshot = self.config.get().await;
        if !snapshot.enabled {
            return Err(RagError::Disabled("rag service is disabled".to_string()));
        }

        let path = Path::new(file_path);
        let doc_id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_path.to_string());
        let kind = infer_kind(path)?;

        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| RagError::NotFound(format!("file '{file_path}' does not exist")))?;

        let (text, json_blocks) = match kind {
            DocumentKind::Markdown => (contents, None),
            DocumentKind::JsonBlocks => {
                let blocks: Vec<JsonBlockInput> = serde_json::from_str(&contents)?;
                (String::new(), Some(blocks))
            }
        };

        let report =
            self.indexer.index_document(&doc_id, kind, &text, json_blocks, clear_existing, &snapshot).await?;

        Ok(IndexFileResponse {
            status: "ok",
            filename: doc_id,
            chunks_created: report.chunks_created,
            message: format!("indexed {} chunks in {}ms", report.chunks_created, report.elapsed_ms),
        })
    }

    pub async fn query(&self, query: &str, options: QueryOptions) -> Result<QueryResult> {
        if query.trim().is_empty() {
            return Err(RagError::Validation("query must not be empty".to_string()));
        }
        let snapshot = self.config.get().await;
        if !snapshot.enabled {
            return Err(RagError::Disabled("rag service is disabled".to_string()));
        }
        self.orchestrator.answer(query, &snapshot, &options).await
    }

    pub async fn clear(&self) -> Result<ClearResponse> {
        self.store.clear().await?;
        Ok(ClearResponse { status: "ok", message: "collection cleared".to_string() })
    }

    pub async fn health(&self) -> HealthStatus {
        let snapshot = self.config.get().await;
        let embeddings_model_available = self.embedder.dimension() > 0;
        let vector_store_ready = self.store.count().await.is_ok();
        let generator_available = self.generator.healthy().await;
        let message = if !snapshot.enabled {
            "service disabled via config".to_string()
        } else if !vector_store_ready {
            "vector store unreachable".to_string()
        } else if !generator_available {
            "generator backend unreachable".to_string()
        } else {
            "ok".to_string()
        };
        HealthStatus {
            rag_enabled: snapshot.enabled,
            embeddings_model_available,
            vector_store_ready,
            generator_available,
            message,
        }
    }

    pub async fn stats(&self) -> Result<Stats> {
        let snapshot = self.config.get().await;
        Ok(Stats {
            vector_store: VectorStoreStats {
                collection_name: snapshot.collection_name.clone(),
                document_count: self.store.count().await?,
                db_path: snapshot.vector_db_path.clone(),
            },
            embedding_model: EmbeddingModelStats {
                model_name: self.embedder.model_id().to_string(),
                embedding_dimension: self.embedder.dimension(),
                device: "cpu",
            },
            config: (*snapshot).clone(),
        })
    }
}

/// Detects [`DocumentKind`] from a file extension (spec §4.9: "Accepts
/// `markdown` and `json-blocks` kinds, detected by extension").
fn infer_kind(path: &Path) -> Result<DocumentKind> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("md") | Some("markdown") => Ok(DocumentKind::Markdown),
        Some("json") => Ok(DocumentKind::JsonBlocks),
        other => Err(RagError::Validation(format!("unsupported file kind: {other:?}"))),
    }
}
