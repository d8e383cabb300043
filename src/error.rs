//! Error taxonomy for the retrieval and synthesis pipeline.
//!
//! Zero rows from a search backend is never an error; it is an empty `Vec`.
//! Errors here describe unavailable or misbehaving collaborators, classified
//! finely enough for the HTTP boundary to pick a status code without parsing
//! message strings.

use thiserror::Error;

/// Classification of an upstream provider failure (embeddings or chat model).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Credentials rejected (401/403). Detail stays out of user responses.
    Auth,
    /// Quota exhausted or rate limited (429).
    Quota,
    /// Transport failure, server error, or malformed response.
    Transport,
}

/// Failure from the embedding provider or the chat model.
#[derive(Debug, Error)]
#[error("{service} request failed: {message}")]
pub struct ProviderError {
    /// Which classification bucket this failure falls into.
    pub kind: ProviderErrorKind,
    /// Human-readable service label, e.g. `"openai embeddings"`.
    pub service: &'static str,
    /// Upstream status/body or transport detail. Logged, never shown to users.
    pub message: String,
}

impl ProviderError {
    /// Builds an auth-classified provider error.
    pub fn auth(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Auth,
            service,
            message: message.into(),
        }
    }

    /// Builds a quota/rate-limit-classified provider error.
    pub fn quota(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Quota,
            service,
            message: message.into(),
        }
    }

    /// Builds a transport-classified provider error.
    pub fn transport(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transport,
            service,
            message: message.into(),
        }
    }

    /// Classifies an HTTP status from a provider into an error.
    pub fn from_status(service: &'static str, status: reqwest::StatusCode, body: String) -> Self {
        let message = format!("{status}: {body}");
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            Self::auth(service, message)
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Self::quota(service, message)
        } else {
            Self::transport(service, message)
        }
    }
}

/// Failure reaching or reading from the vector-capable section store.
#[derive(Debug, Error)]
#[error("section store unavailable: {0}")]
pub struct StoreError(#[from] pub tokio_postgres::Error);

/// Failure reaching or reading from the keyword search index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Transport-level failure talking to the index.
    #[error("keyword index unreachable: {0}")]
    Http(#[from] reqwest::Error),
    /// The index answered with a non-success status.
    #[error("keyword index returned {status}: {body}")]
    Status {
        /// HTTP status from the index.
        status: reqwest::StatusCode,
        /// Response body captured for logs.
        body: String,
    },
    /// The configured API key cannot be sent as an HTTP header.
    #[error("keyword index API key is not a valid header value")]
    InvalidApiKey,
}

/// Failure of a hybrid retrieval call as a whole.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Query embedding failed; there is no vector-less hybrid mode.
    #[error(transparent)]
    Embedding(#[from] ProviderError),
    /// Both search backends failed in the same call. One failing is absorbed
    /// as a partial result and never reaches this variant.
    #[error("both search backends failed (vector: {vector}; keyword: {keyword})")]
    BackendsUnavailable {
        /// What the vector side reported.
        vector: StoreError,
        /// What the keyword side reported.
        keyword: IndexError,
    },
}

/// Failure of an answer-synthesis call.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The mandatory retrieval phase failed.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// The chat model call failed.
    #[error(transparent)]
    Model(ProviderError),
}
