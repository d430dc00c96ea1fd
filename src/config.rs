//! Typed, validated, atomically swappable runtime configuration.
//!
//! Mirrors the "config as kwargs" redesign flag in the source spec: instead
//! of a dict of loosely-typed options, [`ConfigSnapshot`] is a single
//! serializable value type and [`Config`] is the single owner through which
//! all reads and writes flow. Snapshots are immutable; [`Config::update`]
//! builds a new one and swaps it in under a write lock, so a caller that
//! captured a snapshot at the start of a long-running operation keeps using
//! that snapshot even if another request reconfigures the service mid-flight.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::{RagError, Result};

/// Fields that cannot be changed once a collection exists; changing them
/// requires a full rebuild (see spec §4.1 and §6.2).
const IMMUTABLE_FIELDS: &[&str] = &[
    "embedding_model",
    "embedding_dimension",
    "embedder_endpoint",
    "vector_db_path",
    "collection_name",
];

/// The tag for the grounded-prompt template built by `orchestrator::build_prompt`.
/// Bumped whenever the template's wording changes in a way that would affect
/// reproducibility of recorded answers.
pub const PROMPT_VERSION: &str = "ragsmith-prompt-v1";

/// An immutable, validated configuration snapshot.
///
/// Field mutability (at runtime, via [`Config::update`]) is documented per
/// field; attempts to change an immutable field fail with
/// [`RagError::ImmutableField`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigSnapshot {
    /// Master switch. When `false`, `/index` and `/query` refuse work.
    pub enabled: bool,
    /// Target tokens per chunk. Mutable; affects new indexing only.
    pub chunk_size: usize,
    /// Overlap window, in tokens, between consecutive chunks. Mutable.
    pub chunk_overlap: usize,
    /// Floor on tokens per chunk (except a document's sole/final chunk). Mutable.
    pub min_chunk_size: usize,
    /// Embedder batch cap. Mutable.
    pub embed_batch_size: usize,
    /// Selects the `Embedder` implementation. Immutable: changing it
    /// requires rebuilding the collection.
    pub embedding_model: String,
    /// Dimensionality of the embedding space. Read-only; set from the
    /// `Embedder` at startup.
    pub embedding_dimension: usize,
    /// Base URL of the embedding backend, used when `embedding_model` names
    /// an HTTP-backed model rather than the built-in mock. Immutable.
    pub embedder_endpoint: String,
    /// Storage location for the vector index. Immutable.
    pub vector_db_path: String,
    /// Collection identifier. Immutable.
    pub collection_name: String,
    /// Default number of hits to retrieve. Mutable.
    pub top_k: usize,
    /// Minimum cosine similarity for a hit to be kept. Mutable.
    pub similarity_threshold: f32,
    /// Base URL of the local generator backend. Mutable.
    pub generator_endpoint: String,
    /// Model identifier passed to the generator. Mutable.
    pub generator_model: String,
    /// Generator sampling temperature. Mutable.
    pub temperature: f32,
    /// Upper bound on generated tokens. Mutable.
    pub max_tokens: usize,
    /// Total prompt token budget. Mutable.
    pub context_window: usize,
    /// Per-hit character truncation applied when building the prompt. Mutable.
    pub context_chunk_chars: usize,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk_size: 512,
            chunk_overlap: 64,
            min_chunk_size: 64,
            embed_batch_size: 32,
            embedding_model: "mock-embedder".to_string(),
            embedding_dimension: 384,
            embedder_endpoint: "http://localhost:11434".to_string(),
            vector_db_path: "./ragsmith-data".to_string(),
            collection_name: "default".to_string(),
            top_k: 5,
            similarity_threshold: 0.3,
            generator_endpoint: "http://localhost:11434".to_string(),
            generator_model: "llama3".to_string(),
            temperature: 0.2,
            max_tokens: 512,
            context_window: 4096,
            context_chunk_chars: 2000,
        }
    }
}

impl ConfigSnapshot {
    /// Hard byte cap per chunk, guarding against pathological non-tokenizable
    /// text (spec §4.2 step 1).
    pub fn max_chunk_bytes(&self) -> usize {
        self.chunk_size * 8
    }

    fn validate(&self) -> Result<()> {
        if !(200..=2000).contains(&self.chunk_size) {
            return Err(RagError::Validation(format!(
                "chunk_size {} out of range [200, 2000]",
                self.chunk_size
            )));
        }
        if self.chunk_overlap > 500 {
            return Err(RagError::Validation(format!(
                "chunk_overlap {} out of range [0, 500]",
                self.chunk_overlap
            )));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Validation(format!(
                "chunk_overlap {} must be < chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.min_chunk_size < 50 {
            return Err(RagError::Validation(format!(
                "min_chunk_size {} must be >= 50",
                self.min_chunk_size
            )));
        }
        if self.min_chunk_size > self.chunk_size {
            return Err(RagError::Validation(format!(
                "min_chunk_size {} must be <= chunk_size {}",
                self.min_chunk_size, self.chunk_size
            )));
        }
        if !(1..=256).contains(&self.embed_batch_size) {
            return Err(RagError::Validation(format!(
                "embed_batch_size {} out of range [1, 256]",
                self.embed_batch_size
            )));
        }
        if !(1..=20).contains(&self.top_k) {
            return Err(RagError::Validation(format!(
                "top_k {} out of range [1, 20]",
                self.top_k
            )));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::Validation(format!(
                "similarity_threshold {} out of range [0, 1]",
                self.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(RagError::Validation(format!(
                "temperature {} out of range [0, 1]",
                self.temperature
            )));
        }
        if !(1..=8192).contains(&self.max_tokens) {
            return Err(RagError::Validation(format!(
                "max_tokens {} out of range [1, 8192]",
                self.max_tokens
            )));
        }
        if !(512..=32768).contains(&self.context_window) {
            return Err(RagError::Validation(format!(
                "context_window {} out of range [512, 32768]",
                self.context_window
            )));
        }
        if !(200..=8000).contains(&self.context_chunk_chars) {
            return Err(RagError::Validation(format!(
                "context_chunk_chars {} out of range [200, 8000]",
                self.context_chunk_chars
            )));
        }
        Ok(())
    }
}

/// Owns the live [`ConfigSnapshot`] and mediates all reads/writes to it.
///
/// Single-writer/many-reader: reads clone the shared `Arc` under a brief
/// read lock and never block on I/O; writes validate a candidate snapshot
/// before publishing it, so a rejected update leaves the prior snapshot
/// untouched (spec §8, "Config update is transactional").
#[derive(Clone)]
pub struct Config {
    inner: Arc<RwLock<Arc<ConfigSnapshot>>>,
}

impl Config {
    /// Construct a `Config` from an already-validated snapshot.
    pub fn new(snapshot: ConfigSnapshot) -> Result<Self> {
        snapshot.validate()?;
        Ok(Self { inner: Arc::new(RwLock::new(Arc::new(snapshot))) })
    }

    /// Lock-free-ish read of the current snapshot (a brief read-lock plus an
    /// `Arc` clone).
    pub async fn get(&self) -> Arc<ConfigSnapshot> {
        self.inner.read().await.clone()
    }

    /// Applies a JSON patch object to the current snapshot, validates the
    /// result, and swaps it in atomically. Unknown fields are rejected with
    /// [`RagError::Validation`] (spec §6.1 buckets an unknown config field
    /// under the 400 list, not 404); attempts to change an immutable field
    /// (when the new value actually differs) are rejected with
    /// [`RagError::ImmutableField`]; out-of-range values are rejected with
    /// [`RagError::Validation`]. On any rejection, [`Config::get`] continues
    /// to return the prior snapshot unchanged.
    pub async fn update(&self, patch: serde_json::Value) -> Result<Arc<ConfigSnapshot>> {
        let serde_json::Value::Object(patch_fields) = patch else {
            return Err(RagError::Validation("config patch must be a JSON object".to_string()));
        };

        let current = self.get().await;
        let mut current_value = serde_json::to_value(current.as_ref())?;
        let current_fields = current_value.as_object().expect("ConfigSnapshot serializes to an object").clone();

        for (key, new_value) in &patch_fields {
            let Some(existing) = current_fields.get(key) else {
                return Err(RagError::Validation(format!("unknown config field '{key}'")));
            };
            if IMMUTABLE_FIELDS.contains(&key.as_str()) && existing != new_value {
                return Err(RagError::ImmutableField(key.clone()));
            }
        }

        let merged = current_value.as_object_mut().expect("object");
        for (key, value) in patch_fields {
            merged.insert(key, value);
        }

        let candidate: ConfigSnapshot = serde_json::from_value(current_value)?;
        candidate.validate()?;
        let candidate = Arc::new(candidate);

        let mut guard = self.inner.write().await;
        *guard = candidate.clone();
        Ok(candidate)
    }

    /// Loads a snapshot from a JSON file on disk, validating it the same
    /// way [`Config::update`] does. Missing files are not an error at
    /// startup; callers should fall back to [`ConfigSnapshot::default`].
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = fs::read_to_string(path).await?;
        let snapshot: ConfigSnapshot = serde_json::from_str(&data)?;
        Self::new(snapshot)
    }

    /// Persists the current snapshot to `path` as a single JSON object
    /// (spec §6.3: `config.json`, nothing else).
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let snapshot = self.get().await;
        let data = serde_json::to_string_pretty(snapshot.as_ref())?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path, data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_overlap_not_less_than_chunk_size() {
        let mut snap = ConfigSnapshot::default();
        snap.chunk_size = 1000;
        snap.chunk_overlap = 1500;
        assert!(ConfigSnapshot::validate(&snap).is_err());
    }

    #[tokio::test]
    async fn update_is_transactional() {
        let config = Config::new(ConfigSnapshot::default()).unwrap();
        let before = config.get().await;

        let err = config
            .update(serde_json::json!({ "chunk_size": 1000, "chunk_overlap": 1500 }))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));

        let after = config.get().await;
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn rejects_unknown_field() {
        let config = Config::new(ConfigSnapshot::default()).unwrap();
        let err = config.update(serde_json::json!({ "nope": 1 })).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }

    #[tokio::test]
    async fn rejects_immutable_field_change() {
        let config = Config::new(ConfigSnapshot::default()).unwrap();
        let err = config
            .update(serde_json::json!({ "vector_db_path": "/somewhere/else" }))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ImmutableField(_)));
    }

    #[tokio::test]
    async fn allows_immutable_field_set_to_same_value() {
        let config = Config::new(ConfigSnapshot::default()).unwrap();
        let path = ConfigSnapshot::default().vector_db_path;
        config.update(serde_json::json!({ "vector_db_path": path })).await.unwrap();
    }

    #[tokio::test]
    async fn accepts_valid_patch() {
        let config = Config::new(ConfigSnapshot::default()).unwrap();
        let updated = config.update(serde_json::json!({ "top_k": 10 })).await.unwrap();
        assert_eq!(updated.top_k, 10);
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::new(ConfigSnapshot::default()).unwrap();
        config.save(&path).await.unwrap();

        let reloaded = Config::load(&path).await.unwrap();
        assert_eq!(config.get().await, reloaded.get().await);
    }
}
