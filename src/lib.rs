//! # groundsmith
//!
//! Content ingestion and semantic retrieval pipeline for grounding an
//! AI-assisted authoring agent: fetch web content under timeout and
//! identity constraints, normalize and chunk the text, embed each chunk
//! through an external model, cache raw fetches and computed vectors to
//! avoid redundant network/API cost, and persist the results for
//! nearest-neighbour retrieval.
//!
//! ```text
//! URL ──► fetch::Fetcher ──────────────► cache (fetch:<url>)
//!              │
//!              ▼
//!      normalize::normalize ──► chunk::Chunker ──► ordered Chunks
//!                                          │
//!                                          ▼
//!                     embed::Embedder ──► cache (embed:<model>:<hash>)
//!                                          │
//!                                          ▼
//!                     stores::VectorStore::persist (transactional)
//!
//! query ──► embed::Embedder ──► stores::VectorStore::search ──► ranked chunks
//! ```
//!
//! [`pipeline::Pipeline`] composes the stages; the surrounding application
//! supplies an [`embed::EmbeddingProvider`], a [`stores::VectorStore`],
//! and configuration, and consumes only the terminal states of each
//! operation. Transport, rendering, and authorization live entirely
//! outside this crate.

pub mod cache;
pub mod chunk;
pub mod config;
pub mod embed;
pub mod fetch;
pub mod normalize;
pub mod pipeline;
pub mod retry;
pub mod stores;
pub mod types;

pub use cache::{CachePayload, CacheStats, MemoryCache};
pub use chunk::Chunker;
pub use config::{CacheConfig, ChunkerConfig, EmbedderConfig, FetcherConfig, ProviderConfig};
pub use embed::{Embedder, EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
pub use fetch::{FetchOutcome, Fetcher};
pub use normalize::normalize;
pub use pipeline::{IngestError, IngestOptions, IngestReport, IngestStage, Pipeline};
pub use retry::RetryPolicy;
pub use stores::{MemoryVectorStore, SqliteVectorStore, VectorStore};
pub use types::{Chunk, Embedding, PipelineError, RetrievalResult, SourceDocument};
