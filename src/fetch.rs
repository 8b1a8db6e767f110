//! HTTP fetching of source documents with caching and bounded retries.
//!
//! The fetcher issues GET requests under a fixed timeout and client
//! identity, caches successful results under `fetch:<url>`, and
//! short-circuits repeat fetches within the cache TTL without touching the
//! network. Transient failures (timeouts, connection-level errors) are
//! retried with exponential backoff; upstream 4xx responses are not.

use std::sync::Arc;

use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::cache::{CachePayload, MemoryCache};
use crate::config::FetcherConfig;
use crate::types::{PipelineError, SourceDocument};

/// Result of a fetch, indicating whether the document came from the cache.
#[derive(Clone, Debug)]
pub struct FetchOutcome {
    pub document: SourceDocument,
    pub from_cache: bool,
}

/// Cache-aware HTTP fetcher with a fixed client identity.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    cache: Arc<MemoryCache>,
    config: FetcherConfig,
}

impl Fetcher {
    /// Builds a fetcher whose HTTP client carries the configured timeout
    /// and User-Agent on every request.
    pub fn new(config: FetcherConfig, cache: Arc<MemoryCache>) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .use_rustls_tls()
            .build()
            .map_err(|err| PipelineError::Configuration(err.to_string()))?;
        Ok(Self {
            client,
            cache,
            config,
        })
    }

    /// Fetches `url`, reusing a fresh cached document when available.
    ///
    /// On a cache miss the request is retried per the configured policy for
    /// transient failures only, and the successful document is written back
    /// to the cache under `fetch:<url>`.
    pub async fn fetch(&self, url: &str) -> Result<FetchOutcome, PipelineError> {
        let parsed = Url::parse(url)
            .map_err(|err| PipelineError::InvalidDocument(format!("invalid url {url}: {err}")))?;
        let key = cache_key(url);

        let lookup = self
            .cache
            .get_or_compute(&key, self.config.cache_ttl, || async {
                let document = self
                    .config
                    .retry
                    .run(|| self.fetch_from_network(&parsed))
                    .await?;
                Ok(CachePayload::Document(document))
            })
            .await?;

        match lookup.payload {
            CachePayload::Document(document) => {
                debug!(url, from_cache = lookup.from_cache, "fetched document");
                Ok(FetchOutcome {
                    document,
                    from_cache: lookup.from_cache,
                })
            }
            CachePayload::Vector(_) => Err(PipelineError::Storage(format!(
                "cache entry for {key} holds an embedding, not a document"
            ))),
        }
    }

    async fn fetch_from_network(&self, url: &Url) -> Result<SourceDocument, PipelineError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Upstream {
                status: status.as_u16(),
            });
        }
        let raw_text = response.text().await.map_err(map_transport_error)?;
        debug!(%url, bytes = raw_text.len(), "downloaded document");
        Ok(SourceDocument::new(url.as_str(), raw_text))
    }
}

fn cache_key(url: &str) -> String {
    format!("fetch:{url}")
}

fn map_transport_error(err: reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::Timeout
    } else {
        PipelineError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::retry::RetryPolicy;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn fetcher_with(config: FetcherConfig) -> Fetcher {
        let cache = Arc::new(MemoryCache::new(CacheConfig::default()));
        Fetcher::new(config, cache).unwrap()
    }

    fn quick_config() -> FetcherConfig {
        FetcherConfig {
            timeout: Duration::from_millis(500),
            retry: RetryPolicy::none(),
            ..FetcherConfig::default()
        }
    }

    #[tokio::test]
    async fn fetch_returns_document_with_fingerprint() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/post");
                then.status(200).body("<html><body><p>hi</p></body></html>");
            })
            .await;

        let fetcher = fetcher_with(quick_config());
        let outcome = fetcher.fetch(&server.url("/post")).await.unwrap();
        assert!(!outcome.from_cache);
        assert_eq!(
            outcome.document.raw_text,
            "<html><body><p>hi</p></body></html>"
        );
        assert_eq!(outcome.document.content_hash.len(), 64);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn second_fetch_within_ttl_skips_the_network() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/cached");
                then.status(200).body("stable content");
            })
            .await;

        let fetcher = fetcher_with(quick_config());
        let url = server.url("/cached");
        let first = fetcher.fetch(&url).await.unwrap();
        let second = fetcher.fetch(&url).await.unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.document.raw_text, second.document.raw_text);
        assert_eq!(first.document.content_hash, second.document.content_hash);
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn client_errors_surface_as_upstream_and_are_not_retried() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/missing");
                then.status(404).body("nope");
            })
            .await;

        let config = FetcherConfig {
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
            },
            ..quick_config()
        };
        let fetcher = fetcher_with(config);
        let err = fetcher.fetch(&server.url("/missing")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Upstream { status: 404 }));
        assert_eq!(mock.hits_async().await, 1);
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/slow");
                then.status(200)
                    .delay(Duration::from_secs(2))
                    .body("too late");
            })
            .await;

        let fetcher = fetcher_with(quick_config());
        let err = fetcher.fetch(&server.url("/slow")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout));
    }

    #[tokio::test]
    async fn connection_failures_surface_as_network_errors() {
        let fetcher = fetcher_with(quick_config());
        let err = fetcher.fetch("http://127.0.0.1:1/unreachable").await.unwrap_err();
        assert!(matches!(err, PipelineError::Network(_)));
    }

    #[tokio::test]
    async fn invalid_urls_are_rejected_before_any_request() {
        let fetcher = fetcher_with(quick_config());
        let err = fetcher.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDocument(_)));
    }
}
