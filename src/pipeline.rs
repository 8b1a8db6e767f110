//! Ingest and retrieval orchestration.
//!
//! An ingest operation walks a fixed stage sequence
//! (`Fetching → Normalizing → Chunking → Embedding → Persisting → Done`);
//! callers observe only the terminal states: an [`IngestReport`] on
//! success or an [`IngestError`] naming the failed stage. Retrieval is
//! stateless: the query is embedded (cache-aware) and handed to the
//! store's similarity search.
//!
//! Concurrent ingests of different URLs run independently; ingests of the
//! same URL are serialized through a per-URL mutex so delete/persist pairs
//! never interleave. A caller-supplied deadline cancels the operation at
//! the next blocking boundary; the store's transactional persist
//! guarantees no partial rows are left behind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, MemoryCache};
use crate::chunk::Chunker;
use crate::config::{CacheConfig, ChunkerConfig, EmbedderConfig, FetcherConfig};
use crate::embed::{Embedder, EmbeddingProvider};
use crate::fetch::Fetcher;
use crate::normalize::normalize;
use crate::stores::VectorStore;
use crate::types::{PipelineError, RetrievalResult};

/// Stage of an ingest operation, reported on failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestStage {
    Fetching,
    Normalizing,
    Chunking,
    Embedding,
    Persisting,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStage::Fetching => "fetching",
            IngestStage::Normalizing => "normalizing",
            IngestStage::Chunking => "chunking",
            IngestStage::Embedding => "embedding",
            IngestStage::Persisting => "persisting",
        };
        write!(f, "{name}")
    }
}

/// Terminal failure state of an ingest operation.
///
/// `cause` distinguishes "retry later" failures (transient network and
/// rate-limit classes) from "fix configuration" failures (credentials,
/// dimension mismatches).
#[derive(Debug, thiserror::Error)]
#[error("ingest failed during {stage}: {cause}")]
pub struct IngestError {
    pub stage: IngestStage,
    #[source]
    pub cause: PipelineError,
}

/// Terminal success state of an ingest operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IngestReport {
    pub url: String,
    /// Chunks persisted to the store.
    pub chunk_count: usize,
    /// Chunks dropped during embedding (e.g. oversized for the provider).
    pub skipped_chunks: usize,
    /// Whether the raw document was served from the cache.
    pub fetch_from_cache: bool,
    /// Chunk embeddings served from the cache instead of the provider.
    pub embed_cache_hits: usize,
    pub bytes_fetched: usize,
    pub duration_ms: u64,
}

/// Options for a single ingest operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct IngestOptions {
    /// Cooperative cancellation: the operation aborts with
    /// [`PipelineError::Cancelled`] at the next blocking boundary once
    /// this much time has elapsed.
    pub deadline: Option<Duration>,
}

/// The ingest→embed→cache→store→retrieve pipeline.
pub struct Pipeline {
    fetcher: Fetcher,
    chunker: Chunker,
    embedder: Embedder,
    store: Arc<dyn VectorStore>,
    cache: Arc<MemoryCache>,
    inflight: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Starts building a pipeline; an embedding provider and a store are
    /// required, everything else has defaults.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Shared cache statistics (fetch and embed layers combined).
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Ingests one URL to a terminal state.
    ///
    /// Returns only after the document's chunk set is fully persisted
    /// (`Done`) or the operation failed; no intermediate state is
    /// observable. Re-ingesting a URL replaces its previous chunk set.
    pub async fn ingest(
        &self,
        url: &str,
        options: IngestOptions,
    ) -> Result<IngestReport, IngestError> {
        let deadline = options
            .deadline
            .map(|limit| tokio::time::Instant::now() + limit);

        // At most one in-flight ingest per URL.
        let slot = {
            let mut inflight = self.inflight.lock();
            inflight
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = slot.lock().await;

        let started = std::time::Instant::now();
        debug!(url, "ingest started");

        let fetch = bounded(deadline, IngestStage::Fetching, self.fetcher.fetch(url)).await?;
        let bytes_fetched = fetch.document.raw_text.len();

        let text = normalize(&fetch.document.raw_text);
        let chunks = self.chunker.chunk(url, &text);
        debug!(url, chunks = chunks.len(), "normalized and chunked");

        let outcome = bounded(
            deadline,
            IngestStage::Embedding,
            self.embedder.embed_chunks(chunks),
        )
        .await?;
        for skipped in &outcome.skipped {
            warn!(url, index = skipped.index, cause = %skipped.cause, "chunk skipped");
        }

        let pairs: Vec<_> = outcome
            .embedded
            .into_iter()
            .map(|embedded| (embedded.chunk, embedded.embedding))
            .collect();
        let chunk_count = pairs.len();

        bounded(
            deadline,
            IngestStage::Persisting,
            self.store.persist(&fetch.document, pairs),
        )
        .await?;

        let report = IngestReport {
            url: url.to_string(),
            chunk_count,
            skipped_chunks: outcome.skipped.len(),
            fetch_from_cache: fetch.from_cache,
            embed_cache_hits: outcome.cache_hits,
            bytes_fetched,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            url,
            chunks = report.chunk_count,
            skipped = report.skipped_chunks,
            from_cache = report.fetch_from_cache,
            "ingest done"
        );
        Ok(report)
    }

    /// Ingests a batch of URLs concurrently, one operation per URL.
    ///
    /// Results are returned in completion order; no ordering is guaranteed
    /// across URLs.
    pub async fn ingest_many(
        self: &Arc<Self>,
        urls: Vec<String>,
        options: IngestOptions,
    ) -> Vec<(String, Result<IngestReport, IngestError>)> {
        let mut tasks = JoinSet::new();
        for url in urls {
            let pipeline = Arc::clone(self);
            tasks.spawn(async move {
                let result = pipeline.ingest(&url, options).await;
                (url, result)
            });
        }
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(err) => warn!(error = %err, "ingest task aborted"),
            }
        }
        results
    }

    /// Retrieves the `top_k` chunks most similar to `query`.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let vector = self.embedder.embed_text(query).await?;
        self.store.search(&vector, top_k).await
    }

    /// Removes every stored chunk for `url`.
    pub async fn delete_source(&self, url: &str) -> Result<usize, PipelineError> {
        self.store.delete_by_source(url).await
    }
}

async fn bounded<T>(
    deadline: Option<tokio::time::Instant>,
    stage: IngestStage,
    operation: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, IngestError> {
    let result = match deadline {
        Some(at) => match tokio::time::timeout_at(at, operation).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::Cancelled),
        },
        None => operation.await,
    };
    result.map_err(|cause| IngestError { stage, cause })
}

/// Builder for [`Pipeline`] instances.
#[derive(Default)]
pub struct PipelineBuilder {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    store: Option<Arc<dyn VectorStore>>,
    fetcher_config: Option<FetcherConfig>,
    chunker_config: Option<ChunkerConfig>,
    cache_config: Option<CacheConfig>,
    embedder_config: Option<EmbedderConfig>,
}

impl PipelineBuilder {
    /// Set the embedding provider. Required.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the vector store. Required.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_fetcher_config(mut self, config: FetcherConfig) -> Self {
        self.fetcher_config = Some(config);
        self
    }

    #[must_use]
    pub fn with_chunker_config(mut self, config: ChunkerConfig) -> Self {
        self.chunker_config = Some(config);
        self
    }

    #[must_use]
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = Some(config);
        self
    }

    #[must_use]
    pub fn with_embedder_config(mut self, config: EmbedderConfig) -> Self {
        self.embedder_config = Some(config);
        self
    }

    /// Builds the pipeline.
    ///
    /// Fails with [`PipelineError::Configuration`] when the provider or
    /// store is missing, or when the HTTP client cannot be constructed.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let provider = self.provider.ok_or_else(|| {
            PipelineError::Configuration("pipeline requires an embedding provider".into())
        })?;
        let store = self
            .store
            .ok_or_else(|| PipelineError::Configuration("pipeline requires a store".into()))?;
        let cache = Arc::new(MemoryCache::new(self.cache_config.unwrap_or_default()));
        let fetcher = Fetcher::new(self.fetcher_config.unwrap_or_default(), Arc::clone(&cache))?;
        let chunker = Chunker::new(self.chunker_config.unwrap_or_default());
        let embedder = Embedder::new(
            provider,
            Arc::clone(&cache),
            self.embedder_config.unwrap_or_default(),
        );
        Ok(Pipeline {
            fetcher,
            chunker,
            embedder,
            store,
            cache,
            inflight: parking_lot::Mutex::new(HashMap::new()),
        })
    }
}
