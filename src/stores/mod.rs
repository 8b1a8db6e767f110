//! Storage backends for chunks and their embedding vectors.
//!
//! [`VectorStore`] is the only durable layer in the pipeline: the cache
//! may be cleared at any time, but once `persist` returns, the chunk set
//! for a source document is fully indexed and searchable. The trait
//! abstracts over backends so the surrounding application can wire in its
//! own database:
//!
//! ```text
//!                  ┌──────────────────┐
//!                  │ VectorStore trait│
//!                  │   (async CRUD)   │
//!                  └────────┬─────────┘
//!                           │
//!               ┌───────────┴───────────┐
//!               ▼                       ▼
//!        ┌─────────────┐        ┌──────────────┐
//!        │   SQLite    │        │  in-memory   │
//!        │ sqlite-vec  │        │ (tests/WASM) │
//!        └─────────────┘        └──────────────┘
//! ```
//!
//! `persist` is transactional per source document and replaces any prior
//! chunk set for that URL, so re-ingestion never leaves duplicates or
//! orphans behind.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::types::{Chunk, Embedding, PipelineError, RetrievalResult, SourceDocument};

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

/// Durable, searchable storage of chunks and their vectors.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Atomically replaces the stored chunk set for `document.url` with
    /// `chunks`: either every chunk and vector is written, or none are.
    ///
    /// Fails with [`PipelineError::DimensionMismatch`] when the new
    /// vectors disagree with the store's established dimensionality, and
    /// with [`PipelineError::TransactionAborted`] when the write cannot be
    /// committed.
    async fn persist(
        &self,
        document: &SourceDocument,
        chunks: Vec<(Chunk, Embedding)>,
    ) -> Result<(), PipelineError>;

    /// Removes every chunk and vector belonging to `url`, returning the
    /// number of chunks removed.
    async fn delete_by_source(&self, url: &str) -> Result<usize, PipelineError>;

    /// Top-`top_k` chunks by cosine similarity to `query`, in descending
    /// score order with ties broken by most recent fetch time.
    ///
    /// Fails with [`PipelineError::DimensionMismatch`] when `query` does
    /// not match the stored dimensionality.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, PipelineError>;

    /// All chunks for `url` ordered by their position in the source.
    async fn chunks_by_source(&self, url: &str) -> Result<Vec<Chunk>, PipelineError>;

    /// Total number of chunks in the store.
    async fn count(&self) -> Result<usize, PipelineError>;
}

/// Cosine similarity of two equal-length vectors, in `[-1, 1]`.
///
/// Returns 0.0 for degenerate inputs (zero magnitude or length mismatch).
#[must_use]
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}
