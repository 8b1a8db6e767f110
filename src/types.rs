//! Core data model and error taxonomy shared across the pipeline.
//!
//! Every stage of the ingest flow produces or consumes one of the types in
//! this module:
//!
//! - [`SourceDocument`] — the raw result of a successful fetch.
//! - [`Chunk`] — a bounded slice of normalized text, the unit of embedding
//!   and retrieval.
//! - [`Embedding`] — a fixed-length vector tied to a chunk and the model
//!   that produced it.
//! - [`RetrievalResult`] — a scored chunk returned from a similarity query,
//!   produced fresh per query and never persisted.
//!
//! [`PipelineError`] is the single error type used throughout; stages wrap
//! it in [`crate::pipeline::IngestError`] to report which stage failed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Error taxonomy for the ingest and retrieval pipeline.
///
/// Variants split into two propagation classes: transient failures
/// ([`Network`](Self::Network), [`Timeout`](Self::Timeout),
/// [`RateLimited`](Self::RateLimited)) are candidates for local retry with
/// backoff, everything else propagates to the caller immediately. Use
/// [`is_transient`](Self::is_transient) to classify.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// DNS, connection, or TLS level failure before an HTTP status was seen.
    #[error("network error: {0}")]
    Network(String),

    /// The request exceeded its configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The upstream server answered with a non-2xx status.
    #[error("upstream returned status {status}")]
    Upstream { status: u16 },

    /// A single chunk exceeds the embedding provider's input limit.
    #[error("chunk of {chars} chars exceeds provider limit of {limit}")]
    ChunkTooLarge { chars: usize, limit: usize },

    /// Provider credentials are absent or were rejected.
    #[error("embedding provider credentials are missing or rejected")]
    MissingCredentials,

    /// The provider asked us to slow down.
    #[error("rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Query vector length does not match the stored embedding dimensionality.
    #[error("query vector has {query} dimensions, store holds {stored}")]
    DimensionMismatch { query: usize, stored: usize },

    /// A store transaction failed and was rolled back.
    #[error("storage transaction aborted: {0}")]
    TransactionAborted(String),

    /// Non-transactional storage failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A payload could not be interpreted (bad URL, malformed provider
    /// response, mismatched batch sizes).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// Missing or unusable configuration supplied by the caller.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The caller's deadline elapsed before the operation finished.
    #[error("operation cancelled before completion")]
    Cancelled,
}

impl PipelineError {
    /// Whether this failure class may succeed on retry with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Network(_) | PipelineError::Timeout | PipelineError::RateLimited { .. }
        )
    }
}

/// SHA-256 fingerprint of a piece of text, rendered as lowercase hex.
///
/// Used both as the content identity of a [`SourceDocument`] and as the
/// cache key component for chunk embeddings.
#[must_use]
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Raw content fetched from a URL, immutable once created.
///
/// A re-fetch of the same URL produces a new `SourceDocument` that
/// supersedes the previous one; instances are never mutated in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceDocument {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub raw_text: String,
    /// SHA-256 hex digest of `raw_text`.
    pub content_hash: String,
}

impl SourceDocument {
    /// Builds a document from freshly fetched content, stamping the fetch
    /// time and content fingerprint.
    pub fn new(url: impl Into<String>, raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let content_hash = content_hash(&raw_text);
        Self {
            url: url.into(),
            fetched_at: Utc::now(),
            raw_text,
            content_hash,
        }
    }
}

/// A bounded-size slice of normalized document text.
///
/// Chunks are owned by the source document version that produced them and
/// are replaced as a set when the source is re-ingested; ids are not stable
/// across re-ingestion.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source_url: String,
    /// Zero-based ordinal within the source document.
    pub index: usize,
    pub text: String,
    /// SHA-256 hex digest of `text`, unique within one source version.
    pub hash: String,
}

impl Chunk {
    pub fn new(source_url: impl Into<String>, index: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        let hash = content_hash(&text);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_url: source_url.into(),
            index,
            text,
            hash,
        }
    }
}

/// A fixed-length vector representing a chunk's semantic content.
///
/// Vector length is constant per `model`; vectors are never reused across
/// chunks embedded with a different model without re-computation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    /// Identifier of the embedding model that produced `vector`.
    pub model: String,
}

/// A scored chunk returned from similarity search.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1, 1]`, higher is more similar.
    pub score: f32,
    pub source_url: String,
}
