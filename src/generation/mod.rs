//! Generation backends (spec §4.7): turn a prompt into an answer string.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// A generator answers a single prompt, reporting how many output tokens it
/// produced so the orchestrator can include that in `QueryResult` (spec §3).
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32, max_tokens: usize) -> Result<GeneratedAnswer>;

    /// Stable identifier recorded alongside the answer.
    fn model_id(&self) -> &str;

    /// Synchronous reachability check used by `/health` (spec §4.9); never
    /// returns an error, just a flag.
    async fn healthy(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub text: String,
    pub tokens_generated: usize,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    eval_count: usize,
}

#[derive(Deserialize)]
struct OllamaErrorBody {
    error: String,
}

/// Recognizes Ollama's "model not loaded" error shape (`{"error": "model
/// \"x\" not found, try pulling it first"}`) so it can be surfaced as
/// [`RagError::ModelMissing`] instead of a generic backend failure.
fn model_missing(error_text: &str) -> bool {
    serde_json::from_str::<OllamaErrorBody>(error_text)
        .map(|body| body.error.contains("not found"))
        .unwrap_or_else(|_| error_text.contains("not found"))
}

/// Talks to a local Ollama-compatible generator endpoint (spec §6.4):
/// `{ model, prompt, stream: false, options: { temperature, num_predict } }`
/// -> `{ response, eval_count }`.
pub struct OllamaGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), endpoint: endpoint.into(), model: model.into() }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str, temperature: f32, max_tokens: usize) -> Result<GeneratedAnswer> {
        let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));
        let body = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions { temperature, num_predict: max_tokens },
        };
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND || model_missing(&error_text) {
                return Err(RagError::ModelMissing(self.model.clone()));
            }
            return Err(RagError::BackendUnavailable {
                backend: "ollama",
                detail: format!("{status}: {error_text}"),
            });
        }
        let parsed: OllamaResponse = response.json().await?;
        Ok(GeneratedAnswer { text: parsed.response, tokens_generated: parsed.eval_count })
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn healthy(&self) -> bool {
        let url = format!("{}/api/tags", self.endpoint.trim_end_matches('/'));
        matches!(self.client.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }
}

/// Deterministic generator for tests and demos: echoes back a fixed-shape
/// answer derived from the prompt so assertions can check that retrieved
/// context actually reached the generator, grounded in the teacher pack's
/// `MockEmbeddingProvider`-style test doubles.
pub struct MockGenerator {
    model: String,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self { model: "mock-generator".to_string() }
    }
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, prompt: &str, _temperature: f32, max_tokens: usize) -> Result<GeneratedAnswer> {
        let text = format!("[mock answer based on {} prompt chars]", prompt.len());
        let tokens_generated = crate::chunking::estimate_tokens(&text).min(max_tokens);
        Ok(GeneratedAnswer { text, tokens_generated })
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_generator_reflects_prompt_length() {
        let generator = MockGenerator::new();
        let answer = generator.generate("some prompt text", 0.2, 512).await.unwrap();
        assert!(answer.text.contains("17"));
    }

    #[tokio::test]
    async fn missing_model_is_reported_distinctly_from_a_backend_failure() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/api/generate");
                then.status(404).json_body(serde_json::json!({
                    "error": "model \"ghost-model\" not found, try pulling it first"
                }));
            })
            .await;

        let generator = OllamaGenerator::new(server.base_url(), "ghost-model");
        let err = generator.generate("hello", 0.2, 128).await.unwrap_err();
        assert!(matches!(err, RagError::ModelMissing(model) if model == "ghost-model"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn other_backend_failures_stay_backend_unavailable() {
        let server = httpmock::MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(httpmock::Method::POST).path("/api/generate");
                then.status(500).body("internal server error");
            })
            .await;

        let generator = OllamaGenerator::new(server.base_url(), "llama3");
        let err = generator.generate("hello", 0.2, 128).await.unwrap_err();
        assert!(matches!(err, RagError::BackendUnavailable { .. }));
        mock.assert_async().await;
    }
}
