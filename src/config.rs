//! Configuration values for the pipeline components.
//!
//! All configuration is carried as explicit values handed to constructors;
//! nothing in this crate reads global mutable state. [`ProviderConfig`]
//! mirrors the settings block the surrounding application holds for its
//! model provider and can be populated from the environment via
//! [`ProviderConfig::from_env`] for demos and local runs.

use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::types::PipelineError;

/// Connection settings for the embedding/chat model provider.
///
/// The pipeline only calls the embedding endpoint; `chat_model` is carried
/// so the surrounding application can share one provider configuration
/// between retrieval grounding and completion calls.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible API, without the `/embeddings` path.
    pub endpoint: String,
    pub api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
}

impl ProviderConfig {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        chat_model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            chat_model: chat_model.into(),
            embedding_model: embedding_model.into(),
        }
    }

    /// Reads provider settings from the environment (and a `.env` file when
    /// present): `OPENAI_ENDPOINT`, `OPENAI_API_KEY`, `OPENAI_CHAT_MODEL`,
    /// `OPENAI_EMBEDDING_MODEL`.
    pub fn from_env() -> Result<Self, PipelineError> {
        dotenvy::dotenv().ok();
        let endpoint = std::env::var("OPENAI_ENDPOINT")
            .map_err(|_| PipelineError::Configuration("OPENAI_ENDPOINT is not set".into()))?;
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| PipelineError::MissingCredentials)?;
        let chat_model =
            std::env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let embedding_model = std::env::var("OPENAI_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        Ok(Self {
            endpoint,
            api_key,
            chat_model,
            embedding_model,
        })
    }
}

/// Settings for the HTTP fetcher.
#[derive(Clone, Debug)]
pub struct FetcherConfig {
    /// Hard per-request timeout.
    pub timeout: Duration,
    /// Fixed client identity sent with every request.
    pub user_agent: String,
    /// How long a successful fetch stays reusable from the cache.
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "groundsmith/0.1 (content fetcher)".to_string(),
            cache_ttl: Duration::from_secs(15 * 60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Settings for the deterministic chunker.
///
/// The defaults (800 chars with 100 chars of overlap) keep chunks under
/// typical embedding input limits while preserving context continuity
/// between neighbours.
#[derive(Clone, Copy, Debug)]
pub struct ChunkerConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 800,
            overlap_chars: 100,
        }
    }
}

/// Bounds for the in-process cache.
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    /// Total payload byte budget across all entries.
    pub max_bytes: usize,
    /// Maximum number of live entries.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 32 * 1024 * 1024,
            max_entries: 1024,
        }
    }
}

/// Settings for the cache-aware embedder.
#[derive(Clone, Debug)]
pub struct EmbedderConfig {
    /// How long computed vectors stay reusable from the cache.
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60 * 60),
            retry: RetryPolicy::default(),
        }
    }
}
