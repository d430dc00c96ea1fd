//! Crate-wide error taxonomy.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors surfaced by the indexing and retrieval pipeline.
///
/// Variants line up with the HTTP status codes the control surface maps
/// them to: see `api::ApiError`.
#[derive(Error, Debug)]
pub enum RagError {
    /// Invalid input at a boundary: empty query, out-of-range config,
    /// wrong document kind.
    #[error("validation error: {0}")]
    Validation(String),

    /// A referenced resource does not exist: missing file, unknown config
    /// field.
    #[error("not found: {0}")]
    NotFound(String),

    /// Attempt to mutate a config field that is fixed for the collection's
    /// lifetime.
    #[error("field '{0}' is immutable; rebuild the collection to change it")]
    ImmutableField(String),

    /// A vector's dimensionality does not match the collection's.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedder or generator backend could not be reached.
    #[error("{backend} backend unavailable: {detail}")]
    BackendUnavailable { backend: &'static str, detail: String },

    /// The generator does not have the requested model loaded.
    #[error("model '{0}' is not available on the generator backend")]
    ModelMissing(String),

    /// Chunking produced no chunks for a document.
    #[error("document produced no chunks")]
    EmptyDocument,

    /// The service's master switch (`Config.enabled`) is off.
    #[error("service disabled: {0}")]
    Disabled(String),

    /// A failure within the vector store backend.
    #[error("storage error: {0}")]
    Storage(String),

    /// Chunking-specific failure not covered by `EmptyDocument`.
    #[error("chunking error: {0}")]
    Chunking(String),

    /// Wrapped I/O failure.
    #[error("io error: {0}")]
    Io(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    /// Short, stable name for the error kind, used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::Validation(_) => "validation",
            RagError::NotFound(_) => "not_found",
            RagError::ImmutableField(_) => "immutable_field",
            RagError::DimensionMismatch { .. } => "dimension_mismatch",
            RagError::BackendUnavailable { .. } => "backend_unavailable",
            RagError::ModelMissing(_) => "model_missing",
            RagError::EmptyDocument => "empty_document",
            RagError::Disabled(_) => "disabled",
            RagError::Storage(_) => "storage",
            RagError::Chunking(_) => "chunking",
            RagError::Io(_) => "io",
            RagError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RagError {
    fn from(err: serde_json::Error) -> Self {
        RagError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for RagError {
    fn from(err: reqwest::Error) -> Self {
        RagError::BackendUnavailable { backend: "http", detail: err.to_string() }
    }
}

impl From<tokio_rusqlite::Error> for RagError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        RagError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(RagError::EmptyDocument.kind(), "empty_document");
        assert_eq!(
            RagError::DimensionMismatch { expected: 4, actual: 8 }.kind(),
            "dimension_mismatch"
        );
    }
}
