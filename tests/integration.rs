//! End-to-end tests driving a real `Service` (config, mock embedder, SQLite
//! vector store, mock generator) through the same paths the HTTP control
//! surface exposes. Exercises the concrete scenarios and invariants laid out
//! for the indexing/retrieval pipeline: index-then-query, insufficient
//! context, clear semantics, the dimension guard, transactional config
//! updates, and concurrent indexing of distinct documents.

use std::io::Write;
use std::sync::Arc;

use ragsmith::config::{Config, ConfigSnapshot};
use ragsmith::embedding::{Embedder, MockEmbedder};
use ragsmith::error::RagError;
use ragsmith::generation::{Generator, MockGenerator};
use ragsmith::orchestrator::{QueryOptions, INSUFFICIENT_CONTEXT_ANSWER};
use ragsmith::service::Service;
use ragsmith::stores::sqlite::SqliteVectorStore;
use ragsmith::stores::VectorStore;

async fn build_service(dimension: usize) -> (Service, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(dimension));
    let store: Arc<dyn VectorStore> =
        Arc::new(SqliteVectorStore::open(dir.path().join("vec.db"), embedder.clone()).await.unwrap());
    let generator: Arc<dyn Generator> = Arc::new(MockGenerator::new());
    let mut snapshot = ConfigSnapshot::default();
    snapshot.embedding_dimension = dimension;
    snapshot.chunk_size = 200;
    snapshot.chunk_overlap = 0;
    snapshot.min_chunk_size = 50;
    // The mock embedder's hash-based vectors aren't similarity-calibrated the
    // way a real model's are; a non-zero threshold here would make these
    // tests sensitive to hash arithmetic rather than to retrieval behavior.
    snapshot.similarity_threshold = 0.0;
    let config = Config::new(snapshot).unwrap();
    (Service::new(config, embedder, store, generator), dir)
}

fn write_doc(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

/// With `chunk_size = 200`, a section has to run long enough relative to the
/// budget for the heading-deferral margin (20% of `chunk_size`) to force a
/// split at the next heading rather than packing both sections into one
/// chunk. The "Intro" body below sits just above that margin on its own, so
/// "Details" reliably starts its own chunk.
fn repeat_sentence(sentence: &str, times: usize) -> String {
    std::iter::repeat(sentence).take(times).collect::<Vec<_>>().join(" ")
}

#[tokio::test]
async fn index_then_query_happy_path() {
    let (service, dir) = build_service(16).await;
    let intro_body = repeat_sentence(
        "This paragraph explains general background context for retrieval augmented generation pipelines.",
        16,
    );
    let details_body = repeat_sentence(
        "It reduces hallucinations by grounding every answer in retrieved context passages.",
        14,
    );
    let doc_path =
        write_doc(&dir, "doc.md", &format!("# Intro\n{intro_body}\n\n# Details\n{details_body}"));

    let report = service.index_file(&doc_path, false).await.unwrap();
    assert_eq!(report.status, "ok");
    assert!(report.chunks_created >= 2);

    let result = service
        .query("It reduces hallucinations", QueryOptions { top_k: Some(1), include_chunks: false })
        .await
        .unwrap();

    assert!(!result.sources.is_empty());
    assert!(result.confidence > 0.0);
    assert_eq!(result.sources[0].heading.as_deref(), Some("Details"));
}

#[tokio::test]
async fn query_with_unrelated_terms_against_empty_store_refuses() {
    let (service, _dir) = build_service(16).await;

    let result = service
        .query("population of Mars in 2050", QueryOptions { top_k: Some(3), include_chunks: false })
        .await
        .unwrap();

    assert_eq!(result.answer, INSUFFICIENT_CONTEXT_ANSWER);
    assert!(result.sources.is_empty());
    assert_eq!(result.confidence, 0.0);
    assert_eq!(result.tokens_generated, 0);
}

#[tokio::test]
async fn clear_resets_document_count_and_triggers_refusal() {
    let (service, dir) = build_service(16).await;
    let doc_path = write_doc(&dir, "doc.md", "# Intro\nRAG combines retrieval with generation.");
    service.index_file(&doc_path, false).await.unwrap();

    let stats_before = service.stats().await.unwrap();
    assert!(stats_before.vector_store.document_count > 0);

    service.clear().await.unwrap();
    let stats_after = service.stats().await.unwrap();
    assert_eq!(stats_after.vector_store.document_count, 0);

    let result = service
        .query("anything at all", QueryOptions { top_k: Some(3), include_chunks: false })
        .await
        .unwrap();
    assert_eq!(result.answer, INSUFFICIENT_CONTEXT_ANSWER);
}

#[tokio::test]
async fn dimension_mismatch_is_rejected_at_upsert() {
    let dir = tempfile::tempdir().unwrap();
    let opening_embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(16));
    let store = SqliteVectorStore::open(dir.path().join("vec.db"), opening_embedder).await.unwrap();

    let mismatched_embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::new(32));
    let mut config = ConfigSnapshot::default();
    config.chunk_size = 200;
    config.chunk_overlap = 0;
    config.min_chunk_size = 50;
    let indexer = ragsmith::indexer::Indexer::new(mismatched_embedder, Arc::new(store));

    let err = indexer
        .index_document(
            "doc-a",
            ragsmith::chunking::DocumentKind::Markdown,
            "# Heading\nSome body text long enough to form a chunk of its own.",
            None,
            false,
            &config,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::DimensionMismatch { expected: 16, actual: 32 }));
}

#[tokio::test]
async fn config_update_is_transactional_on_bad_range() {
    let config = Config::new(ConfigSnapshot::default()).unwrap();
    let before = config.get().await;

    let err = config.update(serde_json::json!({ "chunk_size": 1000, "chunk_overlap": 1500 })).await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));

    let after = config.get().await;
    assert_eq!(before, after);
}

#[tokio::test]
async fn concurrent_indexing_of_distinct_documents_accumulates_without_interleaving() {
    let (service, dir) = build_service(16).await;
    let service = Arc::new(service);

    let body_a = "# A\n".to_string() + &"First document sentence about alpha topics. ".repeat(30);
    let body_b = "# B\n".to_string() + &"Second document sentence about beta topics. ".repeat(30);
    let path_a = write_doc(&dir, "a.md", &body_a);
    let path_b = write_doc(&dir, "b.md", &body_b);

    let service_a = service.clone();
    let service_b = service.clone();
    let (result_a, result_b) = tokio::join!(
        async move { service_a.index_file(&path_a, false).await },
        async move { service_b.index_file(&path_b, false).await }
    );

    let report_a = result_a.unwrap();
    let report_b = result_b.unwrap();
    assert!(report_a.chunks_created > 0);
    assert!(report_b.chunks_created > 0);

    let stats = service.stats().await.unwrap();
    assert_eq!(stats.vector_store.document_count, report_a.chunks_created + report_b.chunks_created);
}
