//! Wiring demo: ingest a set of URLs and run a retrieval query.
//!
//! Usage:
//!
//! ```text
//! OPENAI_ENDPOINT=https://api.openai.com/v1 \
//! OPENAI_API_KEY=sk-... \
//! cargo run --example blog_ingest -- https://example.com/post "what is the post about?"
//! ```
//!
//! Set `GROUNDSMITH_MOCK_EMBEDDINGS=1` to run offline with the
//! deterministic mock provider.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::FmtSubscriber;

use groundsmith::{
    EmbeddingProvider, HttpEmbeddingProvider, IngestOptions, MockEmbeddingProvider, Pipeline,
    ProviderConfig, SqliteVectorStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut args = env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("usage: blog_ingest <url> [query]");
        return Ok(());
    };
    let query = args.next();

    let provider: Arc<dyn EmbeddingProvider> = if env::var("GROUNDSMITH_MOCK_EMBEDDINGS").is_ok() {
        Arc::new(MockEmbeddingProvider::new())
    } else {
        let config = ProviderConfig::from_env()?;
        Arc::new(HttpEmbeddingProvider::new(
            &config,
            Duration::from_secs(30),
        )?)
    };

    let db_path =
        env::var("GROUNDSMITH_DB").unwrap_or_else(|_| "./groundsmith.sqlite".to_string());
    let store = Arc::new(SqliteVectorStore::open(&db_path).await?);

    let pipeline = Pipeline::builder()
        .with_provider(provider)
        .with_store(store)
        .build()?;

    let report = pipeline.ingest(&url, IngestOptions::default()).await?;
    println!(
        "ingested {} -> {} chunks ({} skipped, {} embed cache hits, {:.2} KB, {} ms)",
        report.url,
        report.chunk_count,
        report.skipped_chunks,
        report.embed_cache_hits,
        report.bytes_fetched as f64 / 1024.0,
        report.duration_ms,
    );

    if let Some(query) = query {
        let results = pipeline.retrieve(&query, 3).await?;
        println!("\ntop {} results for \"{query}\":", results.len());
        for result in results {
            let preview: String = result.chunk.text.chars().take(120).collect();
            println!("  [{:.3}] {} :: {preview}", result.score, result.source_url);
        }
    }

    let stats = pipeline.cache_stats();
    println!(
        "\ncache: {} hits, {} misses, {} evictions",
        stats.hits, stats.misses, stats.evictions
    );
    Ok(())
}

fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "groundsmith=info".to_string()),
        )
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
