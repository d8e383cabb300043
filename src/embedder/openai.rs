//! OpenAI embeddings client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::model::EMBEDDING_DIM;

use super::TextEmbedder;

const SERVICE: &str = "openai embeddings";

/// Embeddings client for OpenAI-compatible endpoints.
///
/// Stateless per request and safe to share behind an `Arc` across concurrent
/// callers. No retries happen here; failures come back classified so the
/// boundary can choose a status code.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Builds a new embeddings client.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
        batch_size: usize,
    ) -> Result<Self, ProviderError> {
        let key = api_key.trim();
        if key.is_empty() {
            return Err(ProviderError::auth(SERVICE, "missing OpenAI API key"));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {key}");
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| ProviderError::auth(SERVICE, "API key is not a valid header value"))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| ProviderError::transport(SERVICE, err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            batch_size: batch_size.max(1),
        })
    }

    /// Maximum inputs accepted per batch call.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::transport(SERVICE, err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ProviderError::from_status(SERVICE, status, text));
        }
        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::transport(SERVICE, err.to_string()))?;
        // The API may reorder entries; `index` restores input order.
        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != inputs.len() {
            return Err(ProviderError::transport(
                SERVICE,
                format!("{} embeddings returned for {} inputs", parsed.data.len(), inputs.len()),
            ));
        }
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|entry| entry.embedding).collect();
        for vector in &vectors {
            check_dimensions(vector)?;
        }
        Ok(vectors)
    }
}

fn check_dimensions(vector: &[f32]) -> Result<(), ProviderError> {
    if vector.len() == EMBEDDING_DIM {
        Ok(())
    } else {
        Err(ProviderError::transport(
            SERVICE,
            format!("embedding has {} dimensions, expected {EMBEDDING_DIM}", vector.len()),
        ))
    }
}

#[async_trait]
impl TextEmbedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.request(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| ProviderError::transport(SERVICE, "no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() > self.batch_size {
            return Err(ProviderError::transport(
                SERVICE,
                format!("batch of {} exceeds configured max {}", texts.len(), self.batch_size),
            ));
        }
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        self.request(&refs).await
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorKind;

    #[test]
    fn rejects_blank_api_key() {
        let err = OpenAiEmbedder::new("  ", "https://api.openai.com/v1", "m", Duration::from_secs(1), 8)
            .err()
            .expect("blank key rejected");
        assert_eq!(err.kind, ProviderErrorKind::Auth);
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let embedder = OpenAiEmbedder::new(
            "sk-test",
            "https://api.openai.com/v1/",
            "text-embedding-ada-002",
            Duration::from_secs(1),
            8,
        )
        .unwrap();
        assert_eq!(embedder.endpoint, "https://api.openai.com/v1/embeddings");
    }

    #[test]
    fn wrong_width_vectors_are_rejected() {
        let err = check_dimensions(&[0.1_f32; 3]).expect_err("3 dims rejected");
        assert_eq!(err.kind, ProviderErrorKind::Transport);
        assert!(check_dimensions(&vec![0.0_f32; EMBEDDING_DIM]).is_ok());
    }

    #[test]
    fn response_entries_resort_by_index() {
        let raw = r#"{"data":[{"embedding":[2.0],"index":1},{"embedding":[1.0],"index":0}]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        parsed.data.sort_by_key(|entry| entry.index);
        assert_eq!(parsed.data[0].embedding, vec![1.0]);
        assert_eq!(parsed.data[1].embedding, vec![2.0]);
    }
}
