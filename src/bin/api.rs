use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tiltguide::{
    AnswerSynthesizer, AnthropicChat, ChatModel, HybridRetriever, MeiliIndex, OpenAiChat,
    OpenAiEmbedder, ProviderErrorKind, RagResponse, RetrievalError, SectionStore, SynthesisError,
};

const MAX_QUERY_CHARS: usize = 1000;

#[derive(Parser, Debug)]
#[command(
    name = "tiltguide-api",
    about = "HTTP API answering questions about pinball rulesets with cited sources"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "TILTGUIDE_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Postgres connection string (postgres://...).
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Meilisearch host for keyword search.
    #[arg(long, env = "MEILI_HOST", default_value = "http://localhost:7700")]
    meili_host: String,

    /// Meilisearch API key, when the instance requires one.
    #[arg(long, env = "MEILI_MASTER_KEY")]
    meili_api_key: Option<String>,

    /// OpenAI API key for query embeddings (and answers with the openai
    /// provider). Absent means the ask endpoint reports unavailable.
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

    /// Seconds before upstream provider requests time out.
    #[arg(long, env = "TILTGUIDE_PROVIDER_TIMEOUT_SECS", default_value_t = 60)]
    provider_timeout_secs: u64,
}

#[derive(Clone)]
struct AppState {
    // None when the embedding provider is unconfigured; the handler then
    // reports unavailable without entering the pipeline.
    synthesizer: Option<Arc<AnswerSynthesizer>>,
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    query: Option<String>,
    #[serde(rename = "gameId")]
    game_id: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    success: bool,
    data: RagResponse,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = ApiCli::parse();
    let synthesizer = match &cli.openai_api_key {
        Some(key) if !key.trim().is_empty() => Some(Arc::new(build_synthesizer(&cli, key).await?)),
        _ => {
            tracing::warn!("OPENAI_API_KEY is not set; ask endpoint will report unavailable");
            None
        }
    };
    let state = AppState { synthesizer };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/ask", post(ask_handler))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    tracing::info!(%addr, "tiltguide-api listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server shutdown")?;
    Ok(())
}

async fn build_synthesizer(cli: &ApiCli, openai_key: &str) -> Result<AnswerSynthesizer> {
    let timeout = Duration::from_secs(cli.provider_timeout_secs.max(1));
    let embedder = OpenAiEmbedder::new(
        openai_key,
        &cli.openai_base_url,
        cli.embed_model.clone(),
        timeout,
        32,
    )?;
    let store = SectionStore::connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let index = MeiliIndex::new(
        &cli.meili_host,
        cli.meili_api_key.as_deref(),
        Duration::from_secs(10),
    )
    .context("failed to build Meilisearch client")?;

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

    let retriever = HybridRetriever::new(
        Arc::new(embedder),
        Arc::new(store),
        Arc::new(index),
    );
    Ok(AnswerSynthesizer::new(retriever, model))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, (StatusCode, Json<ErrorBody>)> {
    let query = match request.query.as_deref() {
        Some(query) => query,
        None => return Err(bad_request("Query is required and must be a string")),
    };
    if query.trim().is_empty() {
        return Err(bad_request("Query cannot be empty"));
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(bad_request("Query is too long (max 1000 characters)"));
    }
    let Some(synthesizer) = &state.synthesizer else {
        return Err(service_unavailable(
            "Answer service is not configured. Please try again later.",
        ));
    };

    let response = synthesizer
        .answer(query, request.game_id.as_deref())
        .await
        .map_err(map_synthesis_error)?;
    Ok(Json(AskResponse {
        success: true,
        data: response,
    }))
}

/// Maps pipeline failures onto user-safe status responses. Upstream detail
/// goes to the log, never to the client.
fn map_synthesis_error(err: SynthesisError) -> (StatusCode, Json<ErrorBody>) {
    tracing::error!(error = %err, "ask pipeline failed");
    match &err {
        SynthesisError::Model(provider)
        | SynthesisError::Retrieval(RetrievalError::Embedding(provider)) => match provider.kind {
            ProviderErrorKind::Auth => error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Answer service configuration error.",
            ),
            ProviderErrorKind::Quota => error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "API rate limit exceeded. Please try again later.",
            ),
            ProviderErrorKind::Transport => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Upstream service unavailable. Please try again later.",
            ),
        },
        SynthesisError::Retrieval(RetrievalError::BackendsUnavailable { .. }) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Search backends are unavailable. Please try again later.",
        ),
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<ErrorBody>) {
    error_response(StatusCode::BAD_REQUEST, message)
}

fn service_unavailable(message: &str) -> (StatusCode, Json<ErrorBody>) {
    error_response(StatusCode::SERVICE_UNAVAILABLE, message)
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
}
