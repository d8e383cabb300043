//! Chat model seam used by answer synthesis.

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicChat;
pub use openai::OpenAiChat;

use async_trait::async_trait;

use crate::error::ProviderError;

/// One grounded generation request.
pub struct ChatRequest<'a> {
    /// Fixed behavioral instruction.
    pub system: &'a str,
    /// Query plus numbered context block.
    pub user: &'a str,
    /// Sampling temperature; synthesis keeps this low.
    pub temperature: f32,
    /// Output length bound.
    pub max_tokens: usize,
}

/// Trait implemented by concrete chat model providers.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generates text for the request; an empty string is a valid response
    /// the caller substitutes, not an error.
    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String, ProviderError>;
}
