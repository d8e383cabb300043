//! Shared data structures flowing between the retrieval pipeline stages.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Dimensionality every stored and query-time embedding must share.
///
/// Comparing vectors of different widths is meaningless, so the embedder
/// rejects provider responses that do not match this constant.
pub const EMBEDDING_DIM: usize = 1536;

/// Loosely-typed metadata attached to a rule section.
///
/// A closed sum over the JSON scalar types plus nesting; retrieval carries
/// these blobs through unchanged and never interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(f64),
    /// JSON string.
    String(String),
    /// Nested mapping.
    Map(Facts),
}

/// Ordered string-keyed facts mapping.
pub type Facts = BTreeMap<String, FactValue>;

/// One titled chunk of a machine's rules documentation, the unit of retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSection {
    /// Stable identifier shared across the vector store and keyword index.
    pub id: String,
    /// Owning ruleset.
    pub ruleset_id: String,
    /// Game the owning ruleset belongs to (denormalized for filtering).
    pub game_id: String,
    /// Game title for display.
    pub game_title: String,
    /// ROM version of the owning ruleset, when known.
    pub rom_version: Option<String>,
    /// Coarse category tag, e.g. "multiball" or "overview".
    pub section_type: String,
    /// Section heading.
    pub title: String,
    /// Retrievable rules text.
    pub body: String,
    /// Structured metadata carried through untouched.
    #[serde(default)]
    pub facts: Facts,
    /// Dense vector for `title + "\n\n" + body`. `None` means not yet
    /// embedded; vector search skips such rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Position of the section within its ruleset.
    #[serde(default)]
    pub order_idx: i32,
}

/// A section returned by vector search together with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredSection {
    /// The matched section.
    pub section: RuleSection,
    /// Cosine similarity to the query embedding, `1 - cosine_distance`.
    pub similarity: f64,
}

/// Which backend produced a retrieval candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Dense vector similarity search.
    Vector,
    /// Lexical keyword search.
    Keyword,
}

/// One candidate handed to the answer synthesizer and echoed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Section identifier.
    pub id: String,
    /// Section heading.
    pub title: String,
    /// Section body text.
    pub body: String,
    /// Game title, when provenance is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_title: Option<String>,
    /// ROM version, when provenance is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rom_version: Option<String>,
    /// Coarse category tag.
    pub section_type: String,
    /// Similarity score, present only for vector-sourced results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    /// Backend provenance. A section found by both backends is recorded once,
    /// tagged `vector`.
    pub source: Source,
}

impl RetrievalResult {
    /// Builds a vector-sourced result from a scored section.
    pub fn from_vector(hit: ScoredSection) -> Self {
        let ScoredSection { section, similarity } = hit;
        Self {
            id: section.id,
            title: section.title,
            body: section.body,
            game_title: Some(section.game_title),
            rom_version: section.rom_version,
            section_type: section.section_type,
            similarity: Some(similarity),
            source: Source::Vector,
        }
    }

    /// Builds a keyword-sourced result; keyword hits carry no similarity.
    pub fn from_keyword(section: RuleSection) -> Self {
        Self {
            id: section.id,
            title: section.title,
            body: section.body,
            game_title: Some(section.game_title),
            rom_version: section.rom_version,
            section_type: section.section_type,
            similarity: None,
            source: Source::Keyword,
        }
    }
}

/// Final answer object returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResponse {
    /// Synthesized natural-language answer with `[n]` citations.
    pub answer: String,
    /// The retrieved sections actually shown to the model, in citation order.
    pub sources: Vec<RetrievalResult>,
    /// The original query echoed back.
    pub query: String,
}
