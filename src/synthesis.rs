//! Grounded answer synthesis over hybrid retrieval output.

use std::sync::Arc;

use crate::error::SynthesisError;
use crate::llm::{ChatModel, ChatRequest};
use crate::model::{RagResponse, RetrievalResult};
use crate::retrieval::{HybridRetriever, RetrievalOptions};

/// Candidates shown to the model per answer.
const CONTEXT_LIMIT: usize = 8;
/// Looser similarity floor than the retriever default; recall matters more
/// than precision once the model is allowed to disclaim weak context.
const CONTEXT_THRESHOLD: f64 = 0.6;
const TEMPERATURE: f32 = 0.3;
const MAX_COMPLETION_TOKENS: usize = 800;

const SYSTEM_PROMPT: &str = "You are a pinball rules expert assistant. Your job is to answer questions about pinball game rules based ONLY on the provided rule sections.

IMPORTANT INSTRUCTIONS:
1. Only use information from the supplied rule sections - never make up or assume information
2. Always cite the specific sections you reference using the format [1], [2], etc.
3. If you prefer information from newer ROM versions, mention this preference
4. If the provided sections don't contain enough information to answer the question, say so clearly
5. Be concise but thorough in your explanations
6. Focus on practical gameplay advice when relevant

The rule sections are numbered [1], [2], etc. for easy citation.";

const NO_RESULTS_ANSWER: &str = "I couldn't find any relevant information in the pinball rules \
database to answer your question. Please try rephrasing your question or check if the game rules \
are available in our database.";

const EMPTY_MODEL_ANSWER: &str = "Unable to generate response.";

/// Builds cited answers from retrieved rule sections.
pub struct AnswerSynthesizer {
    retriever: HybridRetriever,
    model: Arc<dyn ChatModel>,
}

impl AnswerSynthesizer {
    /// Builds a synthesizer from an assembled retriever and a chat model.
    pub fn new(retriever: HybridRetriever, model: Arc<dyn ChatModel>) -> Self {
        Self { retriever, model }
    }

    /// The retriever, for callers that want raw candidates.
    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    /// Answers `query` from the rules corpus, optionally scoped to one game.
    ///
    /// Zero retrieved sections short-circuits to a canned answer without a
    /// model call. Retrieval and model failures both surface to the caller.
    pub async fn answer(
        &self,
        query: &str,
        game_id: Option<&str>,
    ) -> Result<RagResponse, SynthesisError> {
        let sources = self
            .retriever
            .retrieve(
                query,
                game_id,
                RetrievalOptions {
                    limit: CONTEXT_LIMIT,
                    vector_threshold: CONTEXT_THRESHOLD,
                    ..RetrievalOptions::default()
                },
            )
            .await?;

        if sources.is_empty() {
            return Ok(RagResponse {
                answer: NO_RESULTS_ANSWER.to_string(),
                sources,
                query: query.to_string(),
            });
        }

        let user = build_user_message(query, &sources);
        let request = ChatRequest {
            system: SYSTEM_PROMPT,
            user: &user,
            temperature: TEMPERATURE,
            max_tokens: MAX_COMPLETION_TOKENS,
        };
        let mut answer = self
            .model
            .complete(&request)
            .await
            .map_err(SynthesisError::Model)?;
        if answer.trim().is_empty() {
            answer = EMPTY_MODEL_ANSWER.to_string();
        }

        Ok(RagResponse {
            answer,
            sources,
            query: query.to_string(),
        })
    }
}

/// Renders the numbered context block; entry `[n]` corresponds 1:1 to
/// `sources[n - 1]`, which is the citation contract the prompt promises.
fn render_context(sources: &[RetrievalResult]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(index, section)| {
            let game_info = match (&section.game_title, &section.rom_version) {
                (Some(game), Some(rom)) => format!("{game} ({rom})"),
                (Some(game), None) => game.clone(),
                (None, _) => "Unknown Game".to_string(),
            };
            format!("[{}] {} - {}\n{}", index + 1, game_info, section.title, section.body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_user_message(query: &str, sources: &[RetrievalResult]) -> String {
    let mut message = String::new();
    message.push_str("Question: ");
    message.push_str(query);
    message.push_str("\n\nRule Sections:\n");
    message.push_str(&render_context(sources));
    message
}
