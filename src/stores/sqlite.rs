//! SQLite-backed [`VectorStore`] using the `sqlite-vec` extension.
//!
//! Vectors are stored as `vec_f32` blobs and searched with
//! `vec_distance_cosine`; chunk rows and their embeddings are written in a
//! single transaction per source document, so a failed persist leaves the
//! previous chunk set intact.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, OptionalExtension, ffi, rusqlite};
use tracing::debug;

use crate::types::{Chunk, Embedding, PipelineError, RetrievalResult, SourceDocument};

use super::VectorStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sources (
    url          TEXT PRIMARY KEY,
    fetched_at   INTEGER NOT NULL,
    content_hash TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chunks (
    id          TEXT PRIMARY KEY,
    url         TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content     TEXT NOT NULL,
    hash        TEXT NOT NULL,
    model       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_url ON chunks(url);
CREATE TABLE IF NOT EXISTS chunk_embeddings (
    id        TEXT PRIMARY KEY,
    embedding BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

struct ChunkRow {
    id: String,
    index: i64,
    content: String,
    hash: String,
    model: String,
    vector_json: String,
}

/// Durable vector store over a SQLite database file.
#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Connection,
}

impl SqliteVectorStore {
    /// Opens (or creates) the database at `path`, registering the
    /// `sqlite-vec` extension and applying the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        register_sqlite_vec()?;
        let path: PathBuf = path.as_ref().to_path_buf();
        let conn = Connection::open(path)
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))?;
        conn.call(|conn| -> Result<(), rusqlite::Error> {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                ?;
            conn.execute_batch(SCHEMA)
                ?;
            Ok(())
        })
        .await
        .map_err(|err| PipelineError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }

    async fn stored_dimensions(&self) -> Result<Option<usize>, PipelineError> {
        self.conn
            .call(|conn| read_dimensions(conn))
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }
}

fn read_dimensions(conn: &rusqlite::Connection) -> Result<Option<usize>, rusqlite::Error> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'dimensions'", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value.and_then(|value| value.parse().ok()))
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn persist(
        &self,
        document: &SourceDocument,
        chunks: Vec<(Chunk, Embedding)>,
    ) -> Result<(), PipelineError> {
        let url = document.url.clone();
        let fetched_at = document.fetched_at.timestamp_micros();
        let content_hash = document.content_hash.clone();
        let incoming_dims = chunks.first().map(|(_, embedding)| embedding.vector.len());

        let mut rows = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks {
            let vector_json = serde_json::to_string(&embedding.vector)
                .map_err(|err| PipelineError::Storage(err.to_string()))?;
            rows.push(ChunkRow {
                id: chunk.id,
                index: chunk.index as i64,
                content: chunk.text,
                hash: chunk.hash,
                model: embedding.model,
                vector_json,
            });
        }

        let written = rows.len();
        self.conn
            .call(move |conn| -> Result<Result<(), PipelineError>, rusqlite::Error> {
                let tx = conn
                    .transaction()
                    ?;

                if let Some(incoming) = incoming_dims {
                    match read_dimensions(&tx)? {
                        Some(stored) if stored != incoming => {
                            return Ok(Err(PipelineError::DimensionMismatch {
                                query: incoming,
                                stored,
                            }));
                        }
                        None => {
                            tx.execute(
                                "INSERT OR REPLACE INTO meta(key, value) VALUES ('dimensions', ?1)",
                                [incoming.to_string()],
                            )
                            ?;
                        }
                        _ => {}
                    }
                }

                tx.execute(
                    "DELETE FROM chunk_embeddings WHERE id IN (SELECT id FROM chunks WHERE url = ?1)",
                    [&url],
                )
                ?;
                tx.execute("DELETE FROM chunks WHERE url = ?1", [&url])
                    ?;
                tx.execute(
                    "INSERT OR REPLACE INTO sources(url, fetched_at, content_hash) VALUES (?1, ?2, ?3)",
                    (&url, fetched_at, &content_hash),
                )
                ?;

                for row in &rows {
                    tx.execute(
                        "INSERT INTO chunks(id, url, chunk_index, content, hash, model) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        (&row.id, &url, row.index, &row.content, &row.hash, &row.model),
                    )
                    ?;
                    tx.execute(
                        "INSERT INTO chunk_embeddings(id, embedding) VALUES (?1, vec_f32(?2))",
                        (&row.id, &row.vector_json),
                    )
                    ?;
                }

                tx.commit()?;
                Ok(Ok(()))
            })
            .await
            .map_err(|err| PipelineError::TransactionAborted(err.to_string()))??;

        debug!(url = %document.url, chunks = written, "persisted chunk set");
        Ok(())
    }

    async fn delete_by_source(&self, url: &str) -> Result<usize, PipelineError> {
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let tx = conn
                    .transaction()
                    ?;
                tx.execute(
                    "DELETE FROM chunk_embeddings WHERE id IN (SELECT id FROM chunks WHERE url = ?1)",
                    [&url],
                )
                ?;
                let removed = tx
                    .execute("DELETE FROM chunks WHERE url = ?1", [&url])
                    ?;
                tx.execute("DELETE FROM sources WHERE url = ?1", [&url])
                    ?;
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(|err| PipelineError::TransactionAborted(err.to_string()))
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let Some(stored) = self.stored_dimensions().await? else {
            return Ok(Vec::new());
        };
        if query.len() != stored {
            return Err(PipelineError::DimensionMismatch {
                query: query.len(),
                stored,
            });
        }
        let query_json = serde_json::to_string(query)
            .map_err(|err| PipelineError::Storage(err.to_string()))?;

        self.conn
            .call(move |conn| -> Result<Vec<RetrievalResult>, rusqlite::Error> {
                let mut stmt = conn
                    .prepare(
                        "SELECT c.id, c.url, c.chunk_index, c.content, c.hash, \
                         vec_distance_cosine(e.embedding, vec_f32(?1)) AS distance \
                         FROM chunks c \
                         JOIN chunk_embeddings e ON c.id = e.id \
                         JOIN sources s ON c.url = s.url \
                         ORDER BY distance ASC, s.fetched_at DESC \
                         LIMIT ?2",
                    )
                    ?;

                let rows = stmt
                    .query_map((&query_json, top_k as i64), |row| {
                        let source_url: String = row.get(1)?;
                        let distance: f64 = row.get(5)?;
                        Ok(RetrievalResult {
                            chunk: Chunk {
                                id: row.get(0)?,
                                source_url: source_url.clone(),
                                index: row.get::<_, i64>(2)? as usize,
                                text: row.get(3)?,
                                hash: row.get(4)?,
                            },
                            score: 1.0 - distance as f32,
                            source_url,
                        })
                    })
                    ?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn chunks_by_source(&self, url: &str) -> Result<Vec<Chunk>, PipelineError> {
        let url = url.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<Chunk>, rusqlite::Error> {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, url, chunk_index, content, hash FROM chunks \
                         WHERE url = ?1 ORDER BY chunk_index ASC",
                    )
                    ?;
                let rows = stmt
                    .query_map([&url], |row| {
                        Ok(Chunk {
                            id: row.get(0)?,
                            source_url: row.get(1)?,
                            index: row.get::<_, i64>(2)? as usize,
                            text: row.get(3)?,
                            hash: row.get(4)?,
                        })
                    })
                    ?;
                let mut chunks = Vec::new();
                for row in rows {
                    chunks.push(row?);
                }
                Ok(chunks)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }

    async fn count(&self) -> Result<usize, PipelineError> {
        self.conn
            .call(|conn| -> Result<usize, rusqlite::Error> {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    ?;
                Ok(count as usize)
            })
            .await
            .map_err(|err| PipelineError::Storage(err.to_string()))
    }
}

/// Registers `sqlite-vec` as an auto extension exactly once per process.
fn register_sqlite_vec() -> Result<(), PipelineError> {
    static REGISTERED: OnceLock<Result<(), String>> = OnceLock::new();
    REGISTERED
        .get_or_init(|| unsafe {
            type ExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *mut c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: ExtensionInit = transmute::<unsafe extern "C" fn(), ExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc == 0 {
                Ok(())
            } else {
                Err(format!("failed to register sqlite-vec extension (code {rc})"))
            }
        })
        .clone()
        .map_err(PipelineError::Storage)
}
