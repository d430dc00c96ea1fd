//! SQLite + `sqlite-vec` backed [`VectorStore`], grounded directly in
//! `stores/sqlite.rs`'s `SqliteChunkStore`: the same raw-SQL
//! `vec_distance_cosine` query (rig's own vector index assumes it owns the
//! embedding step, which we've already done upstream in the indexer), the
//! same `sqlite3_auto_extension` registration dance, and the same split
//! between a `rig_sqlite::SqliteVectorStore` (used for schema setup) and a
//! raw `tokio_rusqlite::Connection` for everything else.

use std::os::raw::c_char;
use std::path::Path;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use parking_lot::Mutex;
use rig_sqlite::{Column, ColumnValue, SqliteVectorStoreTable};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::{Connection, ffi};

use crate::chunking::{Chunk, ChunkMetadata};
use crate::embedding::{Embedder, RigEmbedderAdapter};
use crate::error::{RagError, Result};

use super::{StoredHit, VectorStore};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct ChunkRow {
    id: String,
    doc_id: String,
    /// Stored as TEXT (teacher's convention): keeps every `ColumnValue` box
    /// the same underlying type rather than mixing `String`/`i64` boxes.
    chunk_index: String,
    text: String,
    metadata: String,
}

impl SqliteVectorStoreTable for ChunkRow {
    fn name() -> &'static str {
        "chunks"
    }

    fn schema() -> Vec<Column> {
        vec![
            Column::new("id", "TEXT PRIMARY KEY"),
            Column::new("doc_id", "TEXT").indexed(),
            Column::new("chunk_index", "TEXT"),
            Column::new("text", "TEXT"),
            Column::new("metadata", "TEXT"),
        ]
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn column_values(&self) -> Vec<(&'static str, Box<dyn ColumnValue>)> {
        vec![
            ("id", Box::new(self.id.clone())),
            ("doc_id", Box::new(self.doc_id.clone())),
            ("chunk_index", Box::new(self.chunk_index.clone())),
            ("text", Box::new(self.text.clone())),
            ("metadata", Box::new(self.metadata.clone())),
        ]
    }
}

fn row_to_chunk(row: ChunkRow) -> Chunk {
    let metadata: ChunkMetadata = serde_json::from_str(&row.metadata).unwrap_or_default();
    Chunk {
        chunk_id: row.id,
        doc_id: row.doc_id,
        chunk_index: row.chunk_index.parse().unwrap_or(0),
        text: row.text,
        token_estimate: 0,
        metadata,
        embedding: None,
    }
}

/// Vector store over a single SQLite file, one `chunks` table plus the
/// `sqlite-vec` virtual table `rig_sqlite` creates alongside it.
pub struct SqliteVectorStore {
    conn: Connection,
    dimension: usize,
    _inner: rig_sqlite::SqliteVectorStore<RigEmbedderAdapter, ChunkRow>,
}

impl SqliteVectorStore {
    /// Opens (creating if absent) the SQLite file at `path`, registering the
    /// `sqlite-vec` extension exactly once per process.
    pub async fn open(path: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map(|_| ())
                .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await?;

        let dimension = embedder.dimension();
        let model = RigEmbedderAdapter::new(embedder);
        let conn_for_queries = conn.clone();
        let inner = rig_sqlite::SqliteVectorStore::new(conn, &model)
            .await
            .map_err(|err| RagError::Storage(err.to_string()))?;

        Ok(Self { conn: conn_for_queries, dimension, _inner: inner })
    }

    fn register_sqlite_vec() -> Result<()> {
        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<()>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    std::mem::transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(RagError::Storage(format!("failed to register sqlite-vec extension (code {rc})")))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock() = Some(result);
        });

        match INIT_RESULT.lock().as_ref() {
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => Err(RagError::Storage(err.to_string())),
            None => unreachable!("Once::call_once always sets INIT_RESULT"),
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        for chunk in chunks {
            let row = ChunkRow {
                id: chunk.chunk_id.clone(),
                doc_id: chunk.doc_id.clone(),
                chunk_index: chunk.chunk_index.to_string(),
                text: chunk.text.clone(),
                metadata: serde_json::to_string(&chunk.metadata)?,
            };
            let embedding = chunk.embedding.ok_or_else(|| {
                RagError::Internal("upsert requires embedded chunks".to_string())
            })?;
            if embedding.len() != self.dimension {
                return Err(RagError::DimensionMismatch { expected: self.dimension, actual: embedding.len() });
            }
            let embedding_json = serde_json::to_string(&embedding)?;

            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO chunks (id, doc_id, chunk_index, text, metadata) \
                         VALUES (?1, ?2, ?3, ?4, ?5) \
                         ON CONFLICT(id) DO UPDATE SET \
                           doc_id = excluded.doc_id, \
                           chunk_index = excluded.chunk_index, \
                           text = excluded.text, \
                           metadata = excluded.metadata",
                        params![row.id, row.doc_id, row.chunk_index, row.text, row.metadata],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    conn.execute(
                        "INSERT INTO chunks_embeddings (rowid, embedding) \
                         SELECT (SELECT rowid FROM chunks WHERE id = ?1), vec_f32(?2) \
                         ON CONFLICT(rowid) DO UPDATE SET embedding = excluded.embedding",
                        params![row.id, embedding_json],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    Ok(())
                })
                .await?;
        }
        Ok(())
    }

    async fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<StoredHit>> {
        let embedding_json = serde_json::to_string(query_embedding)?;
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT c.id, c.doc_id, c.chunk_index, c.text, c.metadata, \
                         vec_distance_cosine(e.embedding, vec_f32(?1)) as distance \
                         FROM chunks c \
                         JOIN chunks_embeddings e ON c.rowid = e.rowid \
                         ORDER BY distance ASC \
                         LIMIT ?2",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mapped = stmt
                    .query_map(params![embedding_json, top_k as i64], |row| {
                        let chunk = ChunkRow {
                            id: row.get(0)?,
                            doc_id: row.get(1)?,
                            chunk_index: row.get(2)?,
                            text: row.get(3)?,
                            metadata: row.get(4)?,
                        };
                        let distance: f32 = row.get(5)?;
                        Ok((chunk, (1.0 - distance).clamp(0.0, 1.0)))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut out = Vec::new();
                for row in mapped {
                    out.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(out)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|(row, similarity)| StoredHit { chunk: row_to_chunk(row), similarity })
            .collect())
    }

    async fn delete(&self, doc_id: &str) -> Result<usize> {
        let doc_id = doc_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM chunks_embeddings WHERE rowid IN (SELECT rowid FROM chunks WHERE doc_id = ?1)",
                    params![doc_id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let deleted = conn
                    .execute("DELETE FROM chunks WHERE doc_id = ?1", params![doc_id])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }

    async fn clear(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM chunks_embeddings", []).map_err(tokio_rusqlite::Error::Rusqlite)?;
                conn.execute("DELETE FROM chunks", []).map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .call(|conn| {
                conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(count as usize)
    }
}

