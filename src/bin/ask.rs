use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tiltguide::{
    AnswerSynthesizer, AnthropicChat, ChatModel, HybridRetriever, KeywordSearch, MeiliIndex,
    OpenAiChat, OpenAiEmbedder, RetrievalOptions, RetrievalResult, SectionStore, Source,
};

#[derive(Parser, Debug)]
#[command(
    name = "tiltguide-ask",
    about = "Ask one question against the pinball rules corpus and print a cited answer"
)]
struct AskCli {
    /// Question to answer.
    #[arg(long)]
    query: String,

    /// Restrict retrieval to one game id.
    #[arg(long)]
    game_id: Option<String>,

    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Meilisearch host for keyword search.
    #[arg(long, env = "MEILI_HOST", default_value = "http://localhost:7700")]
    meili_host: String,

    /// Meilisearch API key, when the instance requires one.
    #[arg(long, env = "MEILI_MASTER_KEY")]
    meili_api_key: Option<String>,

    /// OpenAI API key for embeddings (and answers with the openai provider).
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,

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

    /// Answering provider (openai or anthropic).
    #[arg(long, env = "TILTGUIDE_LLM_PROVIDER", default_value = "openai")]
    llm_provider: String,

    /// Chat model used for answer synthesis.
    #[arg(long, env = "TILTGUIDE_CHAT_MODEL", default_value = "gpt-4")]
    chat_model: String,

    /// Anthropic API key (required when --llm-provider anthropic).
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    anthropic_api_key: Option<String>,

    /// Anthropic API base URL.
    #[arg(
        long,
        env = "TILTGUIDE_ANTHROPIC_BASE",
        default_value = "https://api.anthropic.com"
    )]
    anthropic_base_url: String,

    /// Skip embedding and vector search; use the keyword index alone.
    #[arg(long, default_value_t = false)]
    keyword_only: bool,

    /// Print retrieved sections and exit without calling the chat model.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = AskCli::parse();
    let timeout = Duration::from_secs(60);

    let index = MeiliIndex::new(
        &cli.meili_host,
        cli.meili_api_key.as_deref(),
        Duration::from_secs(10),
    )
    .context("failed to build Meilisearch client")?;

    // Keyword-only needs neither the embedding provider nor Postgres; it is
    // the path to reach for when either of those is down.
    if cli.keyword_only {
        let hits = KeywordSearch::search(&index, &cli.query, cli.game_id.as_deref(), 10)
            .await
            .context("keyword search failed")?;
        let results: Vec<RetrievalResult> =
            hits.into_iter().map(RetrievalResult::from_keyword).collect();
        print_sources(&results);
        return Ok(());
    }

    let store = SectionStore::connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let openai_key = cli
        .openai_api_key
        .as_deref()
        .context("OPENAI_API_KEY must be set")?;
    let embedder = OpenAiEmbedder::new(
        openai_key,
        &cli.openai_base_url,
        cli.embed_model.clone(),
        timeout,
        32,
    )?;
    let retriever = HybridRetriever::new(Arc::new(embedder), Arc::new(store), Arc::new(index));

    if cli.dry_run {
        let results = retriever
            .retrieve(&cli.query, cli.game_id.as_deref(), RetrievalOptions::default())
            .await
            .context("retrieval failed")?;
        print_sources(&results);
        println!("dry-run enabled; skipping chat model call.");
        return Ok(());
    }

    let model: Arc<dyn ChatModel> = match cli.llm_provider.to_lowercase().as_str() {
        "openai" => Arc::new(OpenAiChat::new(
            openai_key,
            &cli.openai_base_url,
            cli.chat_model.clone(),
            timeout,
        )?),
        "anthropic" => {
            let key = cli
                .anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY must be set for the anthropic provider")?;
            Arc::new(AnthropicChat::new(
                key,
                &cli.anthropic_base_url,
                cli.chat_model.clone(),
                timeout,
            )?)
        }
        other => anyhow::bail!("unsupported llm provider '{other}'; use openai or anthropic"),
    };

    let synthesizer = AnswerSynthesizer::new(retriever, model);
    let response = synthesizer
        .answer(&cli.query, cli.game_id.as_deref())
        .await
        .context("answer synthesis failed")?;

    print_sources(&response.sources);
    println!("--- Answer ---\n{}", response.answer);
    Ok(())
}

fn print_sources(sources: &[RetrievalResult]) {
    if sources.is_empty() {
        println!("--- Sources ---\n(none)\n");
        return;
    }
    println!("--- Sources ---");
    for (index, source) in sources.iter().enumerate() {
        let game = source.game_title.as_deref().unwrap_or("Unknown Game");
        let rom = source
            .rom_version
            .as_deref()
            .map(|rom| format!(" ({rom})"))
            .unwrap_or_default();
        let score = match (source.source, source.similarity) {
            (Source::Vector, Some(similarity)) => format!("vector {similarity:.3}"),
            _ => "keyword".to_string(),
        };
        println!("[{}] {game}{rom} - {} [{score}]", index + 1, source.title);
    }
    println!();
}
