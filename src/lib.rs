//! Local retrieval-augmented generation over Markdown/JSON document
//! collections: heading-aware chunking, a pluggable embedder, a SQLite
//! vector store, a retriever, a pluggable generator, a query orchestrator,
//! and an HTTP control surface tying them together.

pub mod api;
pub mod chunking;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod indexer;
pub mod orchestrator;
pub mod resume;
pub mod retriever;
pub mod service;
pub mod stores;

pub use config::{Config, ConfigSnapshot};
pub use error::{RagError, Result};
pub use service::Service;
