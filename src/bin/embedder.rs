use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tiltguide::{embedding_input, OpenAiEmbedder, SectionStore, TextEmbedder};

#[derive(Parser, Debug)]
#[command(
    name = "tiltguide-embedder",
    about = "Backfill embeddings for rule sections that do not have one yet"
)]
struct EmbedCli {
    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// OpenAI API key used for embedding calls.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier.
    #[arg(
        long,
        env = "TILTGUIDE_EMBED_MODEL",
        default_value = "text-embedding-ada-002"
    )]
    embed_model: String,

    /// Base URL for OpenAI-compatible endpoints.
    #[arg(
        long,
        env = "TILTGUIDE_OPENAI_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    /// Sections embedded per provider request.
    #[arg(long, env = "TILTGUIDE_EMBED_BATCH", default_value_t = 32)]
    batch_size: usize,

    /// Seconds before embedding requests time out.
    #[arg(long, env = "TILTGUIDE_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Re-embed every section, not just the ones missing a vector. Use after
    /// bulk body edits, since stored vectors are only valid for the exact
    /// title/body pair they were computed from.
    #[arg(long, default_value_t = false)]
    all: bool,

    /// Upper bound on sections processed in one run.
    #[arg(long, default_value_t = 10_000)]
    max_sections: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = EmbedCli::parse();
    let batch_size = cli.batch_size.max(1);
    let embedder = OpenAiEmbedder::new(
        &cli.openai_api_key,
        &cli.openai_base_url,
        cli.embed_model.clone(),
        Duration::from_secs(cli.timeout_secs.max(1)),
        batch_size,
    )?;
    let store = SectionStore::connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let sections = store
        .sections_missing_embedding(cli.all, cli.max_sections)
        .await
        .context("failed to list sections needing embeddings")?;
    if sections.is_empty() {
        tracing::info!("no sections need embeddings; nothing to do");
        return Ok(());
    }
    tracing::info!(count = sections.len(), "embedding sections");

    let mut embedded = 0usize;
    for batch in sections.chunks(batch_size) {
        let inputs: Vec<String> = batch
            .iter()
            .map(|section| embedding_input(&section.title, &section.body))
            .collect();
        let vectors = embedder
            .embed_batch(&inputs)
            .await
            .context("embedding request failed")?;
        for (section, vector) in batch.iter().zip(vectors) {
            store
                .update_embedding(&section.id, &vector)
                .await
                .with_context(|| format!("failed to store embedding for section {}", section.id))?;
        }
        embedded += batch.len();
        tracing::info!(embedded, total = sections.len(), "progress");
    }

    tracing::info!(embedded, "embedding backfill complete");
    Ok(())
}
