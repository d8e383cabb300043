//! Embedding provider seam and shared embedding-input helpers.

pub mod openai;

pub use openai::OpenAiEmbedder;

use async_trait::async_trait;

use crate::error::ProviderError;

/// Turns text into fixed-width dense vectors.
///
/// Implementations perform no local retries; callers decide how to react to
/// a classified [`ProviderError`].
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Embeds a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embeds an ordered sequence of texts, returning vectors in the same
    /// order and of the same length as the input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Canonical embedding input for a rule section.
///
/// Stored embeddings are only valid for the exact `title`/`body` pair they
/// were computed from; any body edit requires re-embedding through this same
/// helper.
pub fn embedding_input(title: &str, body: &str) -> String {
    format!("{title}\n\n{body}").trim().to_string()
}
