#![warn(missing_docs)]
//! Hybrid retrieval and cited answer synthesis over pinball rulesets.
//!
//! A query flows through [`synthesis::AnswerSynthesizer`], which asks
//! [`retrieval::HybridRetriever`] for candidates; the retriever embeds the
//! query via [`embedder::TextEmbedder`], fans out concurrently to
//! [`retrieval::VectorSearch`] (pgvector) and [`retrieval::KeywordSearch`]
//! (Meilisearch), and merges the two result sets into one ranked list the
//! synthesizer turns into a numbered context block for the chat model.

pub mod embedder;
pub mod error;
pub mod keyword;
pub mod llm;
pub mod model;
pub mod retrieval;
pub mod store;
pub mod synthesis;

pub use embedder::{embedding_input, OpenAiEmbedder, TextEmbedder};
pub use error::{
    IndexError, ProviderError, ProviderErrorKind, RetrievalError, StoreError, SynthesisError,
};
pub use keyword::MeiliIndex;
pub use llm::{AnthropicChat, ChatModel, ChatRequest, OpenAiChat};
pub use model::{
    FactValue, Facts, RagResponse, RetrievalResult, RuleSection, ScoredSection, Source,
    EMBEDDING_DIM,
};
pub use retrieval::{HybridRetriever, KeywordSearch, RetrievalOptions, VectorSearch};
pub use store::SectionStore;
pub use synthesis::AnswerSynthesizer;
