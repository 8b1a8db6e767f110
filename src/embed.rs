//! Embedding computation with per-chunk caching and provider batching.
//!
//! [`EmbeddingProvider`] abstracts the external embedding model; the crate
//! ships an OpenAI-compatible HTTP implementation and a deterministic mock
//! for tests. [`Embedder`] wraps a provider with the shared cache: only
//! chunks whose vectors are not already cached under
//! `embed:<model>:<chunk-hash>` are sent to the provider, batched up to
//! the provider's maximum batch size, and results are reassembled in input
//! order.
//!
//! Failure semantics follow the provider contract: credential problems
//! abort the whole operation, rate limiting is retried honouring the
//! provider's suggested delay, and a single oversized chunk is skipped
//! without aborting the rest of its batch.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::{CachePayload, MemoryCache};
use crate::config::{EmbedderConfig, ProviderConfig};
use crate::types::{Chunk, Embedding, PipelineError, content_hash};

/// An external embedding model.
///
/// Implementations are expected to return one vector per input, in input
/// order, with a constant dimensionality per model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds a batch of at most [`max_batch_size`](Self::max_batch_size)
    /// inputs.
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;

    /// Identifier of the embedding model, used in cache keys and persisted
    /// alongside each vector.
    fn model_id(&self) -> &str;

    /// Largest batch a single request may carry.
    fn max_batch_size(&self) -> usize {
        64
    }

    /// Largest single input, in characters, the provider accepts.
    fn max_input_chars(&self) -> usize {
        8192
    }
}

/// Client for OpenAI-compatible `/embeddings` endpoints.
#[derive(Debug)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    max_batch_size: usize,
    max_input_chars: usize,
}

impl HttpEmbeddingProvider {
    /// Builds a provider from explicit configuration.
    ///
    /// Fails with [`PipelineError::MissingCredentials`] when the API key is
    /// blank, so misconfiguration surfaces at construction rather than on
    /// the first embed call.
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self, PipelineError> {
        if config.api_key.trim().is_empty() {
            return Err(PipelineError::MissingCredentials);
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| PipelineError::MissingCredentials)?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .use_rustls_tls()
            .build()
            .map_err(|err| PipelineError::Configuration(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.endpoint.trim_end_matches('/')),
            model: config.embedding_model.clone(),
            max_batch_size: 64,
            max_input_chars: 8192,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingEntry>,
}

#[derive(Deserialize)]
struct EmbeddingEntry {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if inputs.len() > self.max_batch_size {
            return Err(PipelineError::InvalidDocument(format!(
                "batch of {} inputs exceeds provider maximum of {}",
                inputs.len(),
                self.max_batch_size
            )));
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    PipelineError::Timeout
                } else {
                    PipelineError::Network(err.to_string())
                }
            })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(PipelineError::MissingCredentials);
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(PipelineError::RateLimited { retry_after });
            }
            status if !status.is_success() => {
                return Err(PipelineError::Upstream {
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::InvalidDocument(err.to_string()))?;
        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != inputs.len() {
            return Err(PipelineError::InvalidDocument(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }
}

/// Deterministic embedding provider for tests and offline runs.
///
/// Vectors are seeded from a digest of the input text, so identical text
/// always embeds to an identical vector and different texts diverge.
pub struct MockEmbeddingProvider {
    dimensions: usize,
    calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::with_dimensions(32)
    }

    #[must_use]
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `embed_batch` calls that reached this provider.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let byte = digest[i % digest.len()];
                let mixed = byte.wrapping_add(((i / digest.len()) as u8).wrapping_mul(31));
                f32::from(mixed) / 255.0 - 0.5
            })
            .collect();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs.iter().map(|text| self.embed_one(text)).collect())
    }

    fn model_id(&self) -> &str {
        "mock-embedding"
    }
}

/// One chunk that could not be embedded, with the per-chunk cause.
#[derive(Debug)]
pub struct SkippedChunk {
    /// Position of the chunk in the input sequence.
    pub index: usize,
    pub cause: PipelineError,
}

/// A chunk paired with its computed embedding.
#[derive(Clone, Debug)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Embedding,
}

/// Result of embedding a chunk sequence.
///
/// `embedded` preserves the input order of all chunks that produced a
/// vector; `skipped` records the rest without failing the operation.
#[derive(Debug, Default)]
pub struct EmbedOutcome {
    pub embedded: Vec<EmbeddedChunk>,
    pub skipped: Vec<SkippedChunk>,
    pub cache_hits: usize,
    pub computed: usize,
}

/// Cache-aware embedding front end over an [`EmbeddingProvider`].
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<MemoryCache>,
    config: EmbedderConfig,
}

impl Embedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<MemoryCache>,
        config: EmbedderConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            config,
        }
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    /// Embeds `chunks`, serving already-cached vectors without provider
    /// calls and batching the remainder.
    ///
    /// Oversized chunks are recorded in [`EmbedOutcome::skipped`] with
    /// [`PipelineError::ChunkTooLarge`]; provider-level failures (after
    /// retries for rate limiting) abort the whole call.
    pub async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<EmbedOutcome, PipelineError> {
        let model = self.provider.model_id().to_string();
        let limit = self.provider.max_input_chars();

        let mut slots: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        let mut outcome = EmbedOutcome::default();
        let mut pending: Vec<usize> = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            let key = cache_key(&model, &chunk.hash);
            if let Some(CachePayload::Vector(vector)) = self.cache.get(&key) {
                slots[index] = Some(vector);
                outcome.cache_hits += 1;
                continue;
            }
            let chars = chunk.text.chars().count();
            if chars > limit {
                outcome.skipped.push(SkippedChunk {
                    index,
                    cause: PipelineError::ChunkTooLarge { chars, limit },
                });
                continue;
            }
            pending.push(index);
        }

        for batch in pending.chunks(self.provider.max_batch_size().max(1)) {
            let inputs: Vec<String> = batch.iter().map(|&i| chunks[i].text.clone()).collect();
            let vectors = self
                .config
                .retry
                .run(|| self.provider.embed_batch(&inputs))
                .await?;
            if vectors.len() != inputs.len() {
                return Err(PipelineError::InvalidDocument(format!(
                    "provider returned {} embeddings for {} inputs",
                    vectors.len(),
                    inputs.len()
                )));
            }
            for (&index, vector) in batch.iter().zip(vectors) {
                let key = cache_key(&model, &chunks[index].hash);
                self.cache
                    .put(key, CachePayload::Vector(vector.clone()), self.config.cache_ttl);
                slots[index] = Some(vector);
                outcome.computed += 1;
            }
        }

        debug!(
            total = chunks.len(),
            cache_hits = outcome.cache_hits,
            computed = outcome.computed,
            skipped = outcome.skipped.len(),
            model,
            "embedded chunk batch"
        );

        for (index, chunk) in chunks.into_iter().enumerate() {
            if let Some(vector) = slots[index].take() {
                outcome.embedded.push(EmbeddedChunk {
                    embedding: Embedding {
                        chunk_id: chunk.id.clone(),
                        vector,
                        model: model.clone(),
                    },
                    chunk,
                });
            }
        }
        Ok(outcome)
    }

    /// Embeds a single piece of free text (a retrieval query), using the
    /// same cache keys as chunk embedding.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let key = cache_key(self.provider.model_id(), &content_hash(text));
        let input = vec![text.to_string()];
        let lookup = self
            .cache
            .get_or_compute(&key, self.config.cache_ttl, || async {
                let vectors = self
                    .config
                    .retry
                    .run(|| self.provider.embed_batch(&input))
                    .await?;
                let vector = vectors.into_iter().next().ok_or_else(|| {
                    PipelineError::InvalidDocument("provider returned no embedding".into())
                })?;
                Ok(CachePayload::Vector(vector))
            })
            .await?;
        match lookup.payload {
            CachePayload::Vector(vector) => Ok(vector),
            CachePayload::Document(_) => Err(PipelineError::Storage(format!(
                "cache entry for {key} holds a document, not an embedding"
            ))),
        }
    }
}

fn cache_key(model: &str, hash: &str) -> String {
    format!("embed:{model}:{hash}")
}
