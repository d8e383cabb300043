//! Meilisearch-backed keyword search over rule sections.
//!
//! The index holds denormalized section documents (searchable over title,
//! body, game title, and section type) and is populated by the ingestion
//! side; retrieval only ever queries it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::model::RuleSection;
use crate::retrieval::KeywordSearch;

/// Index name holding rule section documents.
pub const RULE_SECTIONS_INDEX: &str = "rule_sections";

/// Keyword search client speaking the Meilisearch REST API.
#[derive(Clone)]
pub struct MeiliIndex {
    client: Client,
    search_url: String,
}

impl MeiliIndex {
    /// Builds a client for `host` (e.g. `http://localhost:7700`), sending
    /// the master/API key when one is configured.
    pub fn new(host: &str, api_key: Option<&str>, timeout: Duration) -> Result<Self, IndexError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|key| !key.trim().is_empty()) {
            let bearer = format!("Bearer {}", key.trim());
            let value =
                HeaderValue::from_str(&bearer).map_err(|_| IndexError::InvalidApiKey)?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            search_url: format!(
                "{}/indexes/{RULE_SECTIONS_INDEX}/search",
                host.trim_end_matches('/')
            ),
        })
    }
}

#[async_trait]
impl KeywordSearch for MeiliIndex {
    async fn search(
        &self,
        query: &str,
        game_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RuleSection>, IndexError> {
        let filter = game_id.map(game_filter);
        let body = SearchRequest {
            q: query,
            limit,
            filter: filter.as_deref(),
        };
        let response = self.client.post(&self.search_url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(IndexError::Status { status, body });
        }
        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.hits)
    }
}

/// Meilisearch filter expression scoping hits to one game.
fn game_filter(game_id: &str) -> String {
    format!("game_id = \"{}\"", game_id.replace('"', "\\\""))
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Vec<RuleSection>,
}
