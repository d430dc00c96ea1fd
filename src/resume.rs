//! Resume helpers for long-running, caller-driven ingestion batches.
//!
//! Not wired into the HTTP control surface, which indexes one document per
//! call; exposed as a public utility for scripts that call `/index` over a
//! large batch of files and want to skip documents a previous run already
//! processed. Ported from the ingestion resume tracker this crate's
//! `VectorStore`/`Indexer` split otherwise has no equivalent for.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;

use crate::error::Result;

/// Tracks which document IDs have already been processed so a batch ingest
/// script can resume after a crash or interruption.
#[derive(Clone, Debug)]
pub struct ResumeTracker {
    path: PathBuf,
    state: Arc<Mutex<HashSet<String>>>,
}

impl ResumeTracker {
    /// Creates a new tracker that persists state to the provided path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), state: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Path where the tracker persists processed document IDs.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads previously persisted state, if any. A missing file is not an
    /// error: the tracker simply starts empty.
    pub async fn load(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let data = fs::read_to_string(&self.path).await?;
        let ids: Vec<String> = serde_json::from_str(&data)?;
        let mut guard = self.state.lock().await;
        guard.clear();
        guard.extend(ids);
        Ok(())
    }

    /// Returns `true` if `doc_id` has already been processed.
    pub async fn contains(&self, doc_id: &str) -> bool {
        self.state.lock().await.contains(doc_id)
    }

    /// Marks `doc_id` as processed and persists the updated state.
    pub async fn mark_processed(&self, doc_id: &str) -> Result<()> {
        let mut guard = self.state.lock().await;
        let inserted = guard.insert(doc_id.to_string());
        if !inserted && self.path.exists() {
            return Ok(());
        }
        let ids: Vec<String> = guard.iter().cloned().collect();
        drop(guard);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let serialized = serde_json::to_string(&ids)?;
        fs::write(&self.path, serialized).await?;
        Ok(())
    }
}
