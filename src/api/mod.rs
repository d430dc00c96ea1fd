//! HTTP control surface (spec §4.9/§6.1), grounded in `the-agency`'s
//! `api.rs` (`AppState`, `ApiError: IntoResponse`, `create_router`,
//! `start_server`) and `weavegraph`'s `demo7_axum_sse.rs` bootstrap
//! (`TcpListener::bind` + `axum::serve`).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ConfigSnapshot;
use crate::error::RagError;
use crate::orchestrator::QueryOptions;
use crate::service::{HealthStatus, Service, Stats};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
}

/// Wraps [`RagError`] so it can be returned directly from handlers; maps
/// each variant to the status code spec §7 assigns it.
#[derive(Debug)]
pub struct ApiError(RagError);

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        ApiError(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RagError::Validation(_) => StatusCode::BAD_REQUEST,
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            RagError::ImmutableField(_) => StatusCode::BAD_REQUEST,
            RagError::DimensionMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RagError::BackendUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RagError::ModelMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RagError::EmptyDocument => StatusCode::BAD_REQUEST,
            RagError::Disabled(_) => StatusCode::SERVICE_UNAVAILABLE,
            RagError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RagError::Chunking(_) => StatusCode::BAD_REQUEST,
            RagError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RagError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody { detail: self.0.to_string(), kind: self.0.kind() };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn health_handler(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.service.health().await)
}

async fn stats_handler(State(state): State<AppState>) -> ApiResult<Json<Stats>> {
    Ok(Json(state.service.stats().await?))
}

async fn get_config_handler(State(state): State<AppState>) -> Json<ConfigSnapshot> {
    Json((*state.service.config().get().await).clone())
}

async fn update_config_handler(
    State(state): State<AppState>,
    Json(patch): Json<serde_json::Value>,
) -> ApiResult<Json<ConfigSnapshot>> {
    let updated = state.service.config().update(patch).await?;
    Ok(Json((*updated).clone()))
}

#[derive(Deserialize)]
struct IndexRequest {
    file_path: String,
    #[serde(default)]
    clear_existing: bool,
}

async fn index_handler(
    State(state): State<AppState>,
    Json(req): Json<IndexRequest>,
) -> ApiResult<Json<crate::service::IndexFileResponse>> {
    let report = state.service.index_file(&req.file_path, req.clear_existing).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    include_chunks: bool,
}

async fn query_handler(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<crate::orchestrator::QueryResult>> {
    let options = QueryOptions { top_k: req.top_k, include_chunks: req.include_chunks };
    let result = state.service.query(&req.query, options).await?;
    Ok(Json(result))
}

async fn clear_handler(State(state): State<AppState>) -> ApiResult<Json<crate::service::ClearResponse>> {
    Ok(Json(state.service.clear().await?))
}

/// Builds the router: every route lives under `/api/rag`, matching spec §6.1.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/rag/health", get(health_handler))
        .route("/api/rag/stats", get(stats_handler))
        .route("/api/rag/config", get(get_config_handler).put(update_config_handler))
        .route("/api/rag/index", post(index_handler))
        .route("/api/rag/query", post(query_handler))
        .route("/api/rag/clear", post(clear_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Binds and serves the router on `host:port` until the process is signaled
/// to stop.
pub async fn start_server(state: AppState, host: &str, port: u16) -> crate::error::Result<()> {
    let addr = format!("{host}:{port}");
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "ragsmith listening");

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::MockEmbedder;
    use crate::generation::MockGenerator;
    use crate::stores::sqlite::SqliteVectorStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn crate::embedding::Embedder> = Arc::new(MockEmbedder::new(16));
        let store: Arc<dyn crate::stores::VectorStore> =
            Arc::new(SqliteVectorStore::open(dir.path().join("vec.db"), embedder.clone()).await.unwrap());
        let generator: Arc<dyn crate::generation::Generator> = Arc::new(MockGenerator::new());
        let config = Config::new(ConfigSnapshot::default()).unwrap();
        let service = Arc::new(Service::new(config, embedder, store, generator));
        create_router(AppState { service })
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/rag/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn query_with_empty_string_is_rejected() {
        let app = test_app().await;
        let body = serde_json::to_vec(&serde_json::json!({ "query": "" })).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/rag/query")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn index_missing_file_is_not_found() {
        let app = test_app().await;
        let body = serde_json::to_vec(&serde_json::json!({ "file_path": "/no/such/file.md" })).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/rag/index")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn clear_returns_200_with_status_body() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::builder().method("POST").uri("/api/rag/clear").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_config_field_is_bad_request() {
        let app = test_app().await;
        let body = serde_json::to_vec(&serde_json::json!({ "not_a_field": 1 })).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/rag/config")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn disabled_service_rejects_query_with_503() {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn crate::embedding::Embedder> = Arc::new(MockEmbedder::new(16));
        let store: Arc<dyn crate::stores::VectorStore> =
            Arc::new(SqliteVectorStore::open(dir.path().join("vec.db"), embedder.clone()).await.unwrap());
        let generator: Arc<dyn crate::generation::Generator> = Arc::new(MockGenerator::new());
        let mut snapshot = ConfigSnapshot::default();
        snapshot.enabled = false;
        let config = Config::new(snapshot).unwrap();
        let service = Arc::new(Service::new(config, embedder, store, generator));
        let app = create_router(AppState { service });

        let body = serde_json::to_vec(&serde_json::json!({ "query": "anything" })).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/rag/query")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
