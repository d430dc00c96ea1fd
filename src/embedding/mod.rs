//! Embedding backends (spec §4.3): turns chunk/query text into fixed-size
//! vectors. `Embedder` is the crate's own narrow capability contract; the
//! SQLite vector store additionally needs an adapter onto `rig`'s
//! [`rig::embeddings::EmbeddingModel`], built in `adapter`.

mod adapter;

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

pub use adapter::RigEmbedderAdapter;

/// A backend able to turn text into vectors of a fixed dimensionality.
///
/// Implementations must be deterministic for a given model: the same input
/// batch always produces the same vectors (spec §4.3 invariant).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a batch of texts, preserving order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimensionality of vectors this embedder produces.
    fn dimension(&self) -> usize;

    /// Stable identifier recorded in `Stats::model_id`.
    fn model_id(&self) -> &str;
}

/// Deterministic, hash-based embedder with no external dependency. Used for
/// tests, demos, and as the default `embedding_model` (`mock-embedder`) so a
/// freshly-installed service works before any model backend is configured.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if text.is_empty() {
            return vector;
        }
        for (i, token) in word_regex().find_iter(text).enumerate() {
            let hash = blake3::hash(token.as_str().as_bytes());
            let bytes = hash.as_bytes();
            let slot = (bytes[0] as usize + i) % self.dimension;
            let sign = if bytes[1] % 2 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign * (1.0 + (bytes[2] as f32) / 255.0);
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").unwrap())
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "mock-embedder"
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP-backed embedder talking to a local embedding server exposing an
/// Ollama-style `/api/embed` contract: `{ model, input }` -> `{ embeddings }`.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest { model: &self.model, input: texts })
            .send()
            .await?
            .error_for_status()?;
        let body: EmbedResponse = response.json().await?;
        for vector in &body.embeddings {
            if vector.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }
        Ok(body.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
