//! Integration tests for the SQLite + sqlite-vec store.

use chrono::Duration as ChronoDuration;
use tempfile::tempdir;

use groundsmith::{
    Chunk, Embedding, PipelineError, SourceDocument, SqliteVectorStore, VectorStore,
};

fn document(url: &str) -> SourceDocument {
    SourceDocument::new(url, format!("raw content of {url}"))
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

async fn open_store(dir: &tempfile::TempDir) -> SqliteVectorStore {
    SqliteVectorStore::open(dir.path().join("chunks.sqlite"))
        .await
        .unwrap()
}

#[tokio::test]
async fn persist_and_search_round_trip() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let url = "https://example.com/a";

    store
        .persist(
            &document(url),
            vec![
                pair(url, 0, "vectors about rust", vec![1.0, 0.0, 0.0, 0.0]),
                pair(url, 1, "vectors about pasta", vec![0.0, 1.0, 0.0, 0.0]),
            ],
        )
        .await
        .unwrap();

    assert_eq!(store.count().await.unwrap(), 2);

    let results = store.search(&[0.0, 1.0, 0.0, 0.0], 1).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.text, "vectors about pasta");
    assert_eq!(results[0].source_url, url);
    assert!((results[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn chunks_by_source_preserves_ingest_order() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let url = "https://example.com/ordered";

    store
        .persist(
            &document(url),
            vec![
                pair(url, 0, "first", vec![1.0, 0.0]),
                pair(url, 1, "second", vec![0.0, 1.0]),
                pair(url, 2, "third", vec![0.5, 0.5]),
            ],
        )
        .await
        .unwrap();

    let chunks = store.chunks_by_source(url).await.unwrap();
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
    let indexes: Vec<usize> = chunks.iter().map(|c| c.index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
}

#[tokio::test]
async fn reingest_replaces_the_previous_chunk_set_without_orphans() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
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

    // The replaced vectors are gone from search as well.
    let results = store.search(&[1.0, 0.0], 10).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.text, "new only");
}

#[tokio::test]
async fn dimension_mismatch_is_rejected_on_search_and_persist() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    let url = "https://example.com/a";

    store
        .persist(&document(url), vec![pair(url, 0, "text", vec![1.0, 0.0, 0.0])])
        .await
        .unwrap();

    let err = store.search(&[1.0, 0.0], 3).await.unwrap_err();
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
    // The aborted persist left nothing behind.
    assert!(
        store
            .chunks_by_source("https://example.com/b")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn ties_are_broken_by_most_recent_fetch() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;

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
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].source_url, "https://example.com/newer");
    assert_eq!(results[1].source_url, "https://example.com/older");
}

#[tokio::test]
async fn delete_by_source_removes_chunks_vectors_and_source() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;

    store
        .persist(
            &document("https://example.com/a"),
            vec![
                pair("https://example.com/a", 0, "a0", vec![1.0, 0.0]),
                pair("https://example.com/a", 1, "a1", vec![0.0, 1.0]),
            ],
        )
        .await
        .unwrap();
    store
        .persist(
            &document("https://example.com/b"),
            vec![pair("https://example.com/b", 0, "b0", vec![0.7, 0.7])],
        )
        .await
        .unwrap();

    let removed = store.delete_by_source("https://example.com/a").await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(store.count().await.unwrap(), 1);
    let results = store.search(&[1.0, 0.0], 10).await.unwrap();
    assert!(results.iter().all(|r| r.source_url == "https://example.com/b"));
}

#[tokio::test]
async fn search_on_an_empty_store_returns_nothing() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir).await;
    assert!(store.search(&[1.0, 0.0], 5).await.unwrap().is_empty());
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn store_survives_reopening_the_database_file() {
    let dir = tempdir().unwrap();
    let url = "https://example.com/durable";
    {
        let store = open_store(&dir).await;
        store
            .persist(&document(url), vec![pair(url, 0, "durable text", vec![1.0, 0.0])])
            .await
            .unwrap();
    }
    let store = open_store(&dir).await;
    assert_eq!(store.count().await.unwrap(), 1);
    let results = store.search(&[1.0, 0.0], 1).await.unwrap();
    assert_eq!(results[0].chunk.text, "durable text");
}
