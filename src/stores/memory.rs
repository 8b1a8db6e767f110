//! In-memory [`VectorStore`] with brute-force cosine search.
//!
//! Intended for tests and hosts without a database; search scans every
//! stored vector. Persist and delete take the write lock for their whole
//! critical section, which gives the same all-or-nothing visibility as a
//! database transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::{Chunk, Embedding, PipelineError, RetrievalResult, SourceDocument};

use super::{VectorStore, cosine_similarity};

struct StoredChunk {
    chunk: Chunk,
    vector: Vec<f32>,
    fetched_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    sources: HashMap<String, DateTime<Utc>>,
    chunks: Vec<StoredChunk>,
    dimensions: Option<usize>,
}

/// Brute-force in-memory vector store.
#[derive(Default)]
pub struct MemoryVectorStore {
    inner: RwLock<Inner>,
}

impl MemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn persist(
        &self,
        document: &SourceDocument,
        chunks: Vec<(Chunk, Embedding)>,
    ) -> Result<(), PipelineError> {
        let mut inner = self.inner.write();
        if let Some((_, embedding)) = chunks.first() {
            let incoming = embedding.vector.len();
            match inner.dimensions {
                Some(stored) if stored != incoming => {
                    return Err(PipelineError::DimensionMismatch {
                        query: incoming,
                        stored,
                    });
                }
                None => inner.dimensions = Some(incoming),
                _ => {}
            }
        }
        inner.chunks.retain(|stored| stored.chunk.source_url != document.url);
        for (chunk, embedding) in chunks {
            inner.chunks.push(StoredChunk {
                chunk,
                vector: embedding.vector,
                fetched_at: document.fetched_at,
            });
        }
        inner
            .sources
            .insert(document.url.clone(), document.fetched_at);
        Ok(())
    }

    async fn delete_by_source(&self, url: &str) -> Result<usize, PipelineError> {
        let mut inner = self.inner.write();
        let before = inner.chunks.len();
        inner.chunks.retain(|stored| stored.chunk.source_url != url);
        inner.sources.remove(url);
        Ok(before - inner.chunks.len())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievalResult>, PipelineError> {
        let inner = self.inner.read();
        let Some(stored_dims) = inner.dimensions else {
            return Ok(Vec::new());
        };
        if query.len() != stored_dims {
            return Err(PipelineError::DimensionMismatch {
                query: query.len(),
                stored: stored_dims,
            });
        }
        let mut scored: Vec<(f32, DateTime<Utc>, &StoredChunk)> = inner
            .chunks
            .iter()
            .map(|stored| {
                (
                    cosine_similarity(query, &stored.vector),
                    stored.fetched_at,
                    stored,
                )
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.cmp(&a.1))
        });
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, _, stored)| RetrievalResult {
                chunk: stored.chunk.clone(),
                score,
                source_url: stored.chunk.source_url.clone(),
            })
            .collect())
    }

    async fn chunks_by_source(&self, url: &str) -> Result<Vec<Chunk>, PipelineError> {
        let inner = self.inner.read();
        let mut chunks: Vec<Chunk> = inner
            .chunks
            .iter()
            .filter(|stored| stored.chunk.source_url == url)
            .map(|stored| stored.chunk.clone())
            .collect();
        chunks.sort_by_key(|chunk| chunk.index);
        Ok(chunks)
    }

    async fn count(&self) -> Result<usize, PipelineError> {
        Ok(self.inner.read().chunks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn document(url: &str) -> SourceDocument {
        SourceDocument::new(url, format!("content of {url}"))
    }

    fn pair(url: &str, index: usize, text: &str, vector: Vec<f32>) -> (Chunk, Embedding) {
        let chunk = Chunk::new(url, index, text);
        let embedding = Embedding {
            chunk_id: chunk.id.clone(),
            vector,
            model: "mock-embedding".into(),
        };
        (chunk, embedding)
    }

    #[tokio::test]
    async fn persisted_vector_is_its_own_best_match() {
        let store = MemoryVectorStore::new();
        let doc = document("https://example.com/a");
        store
            .persist(
                &doc,
                vec![
                    pair("https://example.com/a", 0, "first", vec![1.0, 0.0, 0.0]),
                    pair("https://example.com/a", 1, "second", vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let results = store.search(&[0.0, 1.0, 0.0], 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.text, "second");
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn reingest_replaces_the_previous_chunk_set() {
        let store = MemoryVectorStore::new();
        let url = "https://example.com/post";
        store
            .persist(
                &document(url),
                vec![
                    pair(url, 0, "old one", vec![1.0, 0.0]),
                    pair(url, 1, "old two", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
            .persist(&document(url), vec![pair(url, 0, "new only", vec![0.5, 0.5])])
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let chunks = store.chunks_by_source(url).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "new only");
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = MemoryVectorStore::new();
        let url = "https://example.com/a";
        store
            .persist(&document(url), vec![pair(url, 0, "text", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let err = store.search(&[1.0, 0.0], 5).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch {
                query: 2,
                stored: 3
            }
        ));

        let err = store
            .persist(
                &document("https://example.com/b"),
                vec![pair("https://example.com/b", 0, "short", vec![1.0])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn ties_are_broken_by_most_recent_fetch() {
        let store = MemoryVectorStore::new();
        let mut older = document("https://example.com/older");
        older.fetched_at -= ChronoDuration::hours(1);
        let newer = document("https://example.com/newer");

        store
            .persist(
                &older,
                vec![pair("https://example.com/older", 0, "same", vec![1.0, 0.0])],
            )
            .await
            .unwrap();
        store
            .persist(
                &newer,
                vec![pair("https://example.com/newer", 0, "same", vec![1.0, 0.0])],
            )
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].source_url, "https://example.com/newer");
        assert_eq!(results[1].source_url, "https://example.com/older");
    }

    #[tokio::test]
    async fn delete_by_source_removes_only_that_source() {
        let store = MemoryVectorStore::new();
        store
            .persist(
                &document("https://example.com/a"),
                vec![pair("https://example.com/a", 0, "a", vec![1.0, 0.0])],
            )
            .await
            .unwrap();
        store
            .persist(
                &document("https://example.com/b"),
                vec![pair("https://example.com/b", 0, "b", vec![0.0, 1.0])],
            )
            .await
            .unwrap();

        let removed = store.delete_by_source("https://example.com/a").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(
            store
                .chunks_by_source("https://example.com/a")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn search_on_an_empty_store_returns_nothing() {
        let store = MemoryVectorStore::new();
        assert!(store.search(&[1.0, 0.0], 3).await.unwrap().is_empty());
    }
}
