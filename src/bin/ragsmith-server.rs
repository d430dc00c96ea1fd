//! Bootstraps the control surface: tracing, config load/defaults, backend
//! construction, and the axum server loop.

use std::env;
use std::sync::Arc;

use ragsmith::api::{self, AppState};
use ragsmith::config::{Config, ConfigSnapshot};
use ragsmith::embedding::{Embedder, HttpEmbedder, MockEmbedder};
use ragsmith::generation::{Generator, OllamaGenerator};
use ragsmith::service::Service;
use ragsmith::stores::sqlite::SqliteVectorStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ragsmith::Result<()> {
    init_tracing();

    let config_path = env::var("RAGSMITH_CONFIG").unwrap_or_else(|_| "./config.json".to_string());
    let config = match Config::load(&config_path).await {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(%err, path = %config_path, "no usable config file, starting from defaults");
            Config::new(ConfigSnapshot::default())?
        }
    };
    let snapshot = config.get().await;

    let embedder: Arc<dyn Embedder> = if snapshot.embedding_model == "mock-embedder" {
        Arc::new(MockEmbedder::new(snapshot.embedding_dimension))
    } else {
        Arc::new(HttpEmbedder::new(
            snapshot.embedder_endpoint.clone(),
            snapshot.embedding_model.clone(),
            snapshot.embedding_dimension,
        ))
    };

    let store = Arc::new(SqliteVectorStore::open(&snapshot.vector_db_path, embedder.clone()).await?);
    let generator: Arc<dyn Generator> =
        Arc::new(OllamaGenerator::new(snapshot.generator_endpoint.clone(), snapshot.generator_model.clone()));

    let service = Arc::new(Service::new(config.clone(), embedder, store, generator));

    let host = env::var("RAGSMITH_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("RAGSMITH_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8080);

    let shutdown_config = config.clone();
    let shutdown_path = config_path.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            if let Err(err) = shutdown_config.save(&shutdown_path).await {
                tracing::error!(%err, "failed to persist config on shutdown");
            }
            std::process::exit(0);
        }
    });

    api::start_server(AppState { service }, &host, port).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
