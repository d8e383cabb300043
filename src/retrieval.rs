//! Hybrid retrieval: dense vector similarity fused with keyword search.
//!
//! One retrieval call embeds the query, fans out to both backends
//! concurrently, absorbs a single backend failure as an empty partial
//! result, and merges the rest into one deduplicated, ordered candidate
//! list. There is no vector-less hybrid mode: callers that want keyword-only
//! behavior use [`HybridRetriever::keyword_only`] explicitly.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::embedder::TextEmbedder;
use crate::error::{IndexError, RetrievalError, StoreError};
use crate::model::{RetrievalResult, RuleSection, ScoredSection};

/// Share of the result budget allotted to vector search.
const VECTOR_BUDGET_SHARE: f64 = 0.7;

/// Dense similarity search over sections with stored embeddings.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Returns up to `limit` sections whose similarity to `query` exceeds
    /// `threshold`, most similar first, optionally restricted to one game.
    async fn search(
        &self,
        query: &[f32],
        game_id: Option<&str>,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<ScoredSection>, StoreError>;
}

/// Lexical search over section text, backend-relevance ordered.
#[async_trait]
pub trait KeywordSearch: Send + Sync {
    /// Returns up to `limit` lexically matching sections, optionally
    /// restricted to one game.
    async fn search(
        &self,
        query: &str,
        game_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RuleSection>, IndexError>;
}

/// Tuning knobs for one hybrid retrieval call.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    /// Total candidates returned after merging.
    pub limit: usize,
    /// Minimum similarity a vector hit must exceed.
    pub vector_threshold: f64,
    /// Candidates requested from the keyword backend, independent of `limit`.
    pub keyword_limit: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            vector_threshold: 0.7,
            keyword_limit: 5,
        }
    }
}

/// Orchestrates the embedding provider and both search backends.
///
/// Handles are injected once at startup and shared by reference across
/// requests; nothing here holds per-request mutable state.
pub struct HybridRetriever {
    embedder: Arc<dyn TextEmbedder>,
    vector: Arc<dyn VectorSearch>,
    keyword: Arc<dyn KeywordSearch>,
}

impl HybridRetriever {
    /// Builds a retriever from injected service handles.
    pub fn new(
        embedder: Arc<dyn TextEmbedder>,
        vector: Arc<dyn VectorSearch>,
        keyword: Arc<dyn KeywordSearch>,
    ) -> Self {
        Self {
            embedder,
            vector,
            keyword,
        }
    }

    /// Runs hybrid retrieval for `query`, optionally scoped to one game.
    ///
    /// Embedding failure is fatal. A single backend failing is logged and
    /// replaced with an empty partial result; both failing in the same call
    /// is [`RetrievalError::BackendsUnavailable`]. Zero rows from both
    /// backends is a successful empty result.
    pub async fn retrieve(
        &self,
        query: &str,
        game_id: Option<&str>,
        options: RetrievalOptions,
    ) -> Result<Vec<RetrievalResult>, RetrievalError> {
        if options.limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(query).await?;

        let vector_limit = vector_budget(options.limit);
        let (vector_out, keyword_out) = tokio::join!(
            self.vector
                .search(&embedding, game_id, vector_limit, options.vector_threshold),
            self.keyword.search(query, game_id, options.keyword_limit),
        );

        let (vector_hits, vector_err) = match vector_out {
            Ok(hits) => (hits, None),
            Err(err) => {
                tracing::warn!(error = %err, "vector search failed; continuing with keyword hits");
                (Vec::new(), Some(err))
            }
        };
        let (keyword_hits, keyword_err) = match keyword_out {
            Ok(hits) => (hits, None),
            Err(err) => {
                tracing::warn!(error = %err, "keyword search failed; continuing with vector hits");
                (Vec::new(), Some(err))
            }
        };
        if let (Some(vector), Some(keyword)) = (vector_err, keyword_err) {
            return Err(RetrievalError::BackendsUnavailable { vector, keyword });
        }

        Ok(merge(vector_hits, keyword_hits, options.limit))
    }

    /// Keyword-only retrieval, the explicit degraded path for callers that
    /// cannot (or choose not to) embed the query.
    pub async fn keyword_only(
        &self,
        query: &str,
        game_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<RetrievalResult>, IndexError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let hits = self.keyword.search(query, game_id, limit).await?;
        Ok(hits.into_iter().map(RetrievalResult::from_keyword).collect())
    }
}

/// Candidates requested from the vector backend for a given total budget.
fn vector_budget(limit: usize) -> usize {
    (limit as f64 * VECTOR_BUDGET_SHARE).ceil() as usize
}

/// Merges both result sets: deduplicate by id with vector precedence, order
/// vector hits (descending similarity) ahead of keyword hits (backend
/// relevance order), truncate to `limit`.
fn merge(
    vector_hits: Vec<ScoredSection>,
    keyword_hits: Vec<RuleSection>,
    limit: usize,
) -> Vec<RetrievalResult> {
    let mut vector_hits = vector_hits;
    vector_hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(vector_hits.len() + keyword_hits.len());
    for hit in vector_hits {
        if seen.insert(hit.section.id.clone()) {
            merged.push(RetrievalResult::from_vector(hit));
        }
    }
    // A section found by both backends stays tagged vector; the keyword
    // match for that id is discarded.
    for section in keyword_hits {
        if seen.insert(section.id.clone()) {
            merged.push(RetrievalResult::from_keyword(section));
        }
    }
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::model::{Facts, Source};
    use std::sync::Mutex;

    fn section(id: &str, game_id: &str, title: &str) -> RuleSection {
        RuleSection {
            id: id.to_string(),
            ruleset_id: format!("rs-{game_id}"),
            game_id: game_id.to_string(),
            game_title: "Attack from Mars".to_string(),
            rom_version: Some("1.13".to_string()),
            section_type: "multiball".to_string(),
            title: title.to_string(),
            body: "Lock three balls at the saucer.".to_string(),
            facts: Facts::new(),
            order_idx: 0,
            embedding: None,
        }
    }

    fn scored(id: &str, similarity: f64) -> ScoredSection {
        ScoredSection {
            section: section(id, "g-afm", "Martian Multiball"),
            similarity,
        }
    }

    struct FakeEmbedder {
        fail: bool,
        calls: Mutex<usize>,
    }

    impl FakeEmbedder {
        fn ok() -> Self {
            Self {
                fail: false,
                calls: Mutex::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl TextEmbedder for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                Err(ProviderError::quota("fake embeddings", "rate limited"))
            } else {
                Ok(vec![0.1; 4])
            }
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }
    }

    #[derive(Default)]
    struct VectorCall {
        game_id: Option<String>,
        limit: usize,
        threshold: f64,
    }

    struct FakeVector {
        hits: Vec<ScoredSection>,
        fail: bool,
        calls: Mutex<Vec<VectorCall>>,
    }

    impl FakeVector {
        fn with(hits: Vec<ScoredSection>) -> Self {
            Self {
                hits,
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                hits: Vec::new(),
                fail: true,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VectorSearch for FakeVector {
        async fn search(
            &self,
            _query: &[f32],
            game_id: Option<&str>,
            limit: usize,
            threshold: f64,
        ) -> Result<Vec<ScoredSection>, StoreError> {
            self.calls.lock().unwrap().push(VectorCall {
                game_id: game_id.map(str::to_string),
                limit,
                threshold,
            });
            if self.fail {
                return Err(StoreError(bad_config_error()));
            }
            let mut hits: Vec<ScoredSection> = self
                .hits
                .iter()
                .filter(|hit| hit.similarity > threshold)
                .filter(|hit| game_id.is_none_or(|game| hit.section.game_id == game))
                .cloned()
                .collect();
            hits.truncate(limit);
            Ok(hits)
        }
    }

    struct FakeKeyword {
        hits: Vec<RuleSection>,
        fail: bool,
        calls: Mutex<Vec<(Option<String>, usize)>>,
    }

    impl FakeKeyword {
        fn with(hits: Vec<RuleSection>) -> Self {
            Self {
                hits,
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                hits: Vec::new(),
                fail: true,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl KeywordSearch for FakeKeyword {
        async fn search(
            &self,
            _query: &str,
            game_id: Option<&str>,
            limit: usize,
        ) -> Result<Vec<RuleSection>, IndexError> {
            self.calls
                .lock()
                .unwrap()
                .push((game_id.map(str::to_string), limit));
            if self.fail {
                return Err(IndexError::Status {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    body: "index offline".to_string(),
                });
            }
            let mut hits: Vec<RuleSection> = self
                .hits
                .iter()
                .filter(|section| game_id.is_none_or(|game| section.game_id == game))
                .cloned()
                .collect();
            hits.truncate(limit);
            Ok(hits)
        }
    }

    /// Produces a real tokio_postgres::Error without touching the network by
    /// failing connection-string parsing.
    fn bad_config_error() -> tokio_postgres::Error {
        "port=not-a-number"
            .parse::<tokio_postgres::Config>()
            .err()
            .expect("invalid port must fail to parse")
    }

    fn retriever(
        embedder: FakeEmbedder,
        vector: FakeVector,
        keyword: FakeKeyword,
    ) -> (HybridRetriever, Arc<FakeVector>, Arc<FakeKeyword>) {
        let vector = Arc::new(vector);
        let keyword = Arc::new(keyword);
        let retriever = HybridRetriever::new(
            Arc::new(embedder),
            Arc::clone(&vector) as Arc<dyn VectorSearch>,
            Arc::clone(&keyword) as Arc<dyn KeywordSearch>,
        );
        (retriever, vector, keyword)
    }

    #[test]
    fn vector_budget_is_seventy_percent_rounded_up() {
        assert_eq!(vector_budget(10), 7);
        assert_eq!(vector_budget(8), 6);
        assert_eq!(vector_budget(1), 1);
        assert_eq!(vector_budget(3), 3);
        for limit in 1..50 {
            let expected = (limit as f64 * 0.7).ceil() as usize;
            assert_eq!(vector_budget(limit), expected);
        }
    }

    #[tokio::test]
    async fn budget_split_reaches_backends() {
        let (retriever, vector, keyword) = retriever(
            FakeEmbedder::ok(),
            FakeVector::with(vec![]),
            FakeKeyword::with(vec![]),
        );
        retriever
            .retrieve("martian attack", None, RetrievalOptions::default())
            .await
            .unwrap();
        let vector_calls = vector.calls.lock().unwrap();
        assert_eq!(vector_calls.len(), 1);
        assert_eq!(vector_calls[0].limit, 7);
        assert!((vector_calls[0].threshold - 0.7).abs() < f64::EPSILON);
        let keyword_calls = keyword.calls.lock().unwrap();
        assert_eq!(*keyword_calls, vec![(None, 5)]);
    }

    #[tokio::test]
    async fn duplicate_ids_stay_vector_tagged() {
        let shared = section("s-1", "g-afm", "Martian Multiball");
        let (retriever, _, _) = retriever(
            FakeEmbedder::ok(),
            FakeVector::with(vec![scored("s-1", 0.91)]),
            FakeKeyword::with(vec![shared, section("s-2", "g-afm", "Strobe Multiball")]),
        );
        let results = retriever
            .retrieve("multiball", None, RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "s-1");
        assert_eq!(results[0].source, Source::Vector);
        assert!(results[0].similarity.is_some());
        assert_eq!(results[1].id, "s-2");
        assert_eq!(results[1].source, Source::Keyword);
        assert_eq!(results.iter().filter(|r| r.id == "s-1").count(), 1);
    }

    #[tokio::test]
    async fn vector_entries_precede_keyword_entries_in_similarity_order() {
        let (retriever, _, _) = retriever(
            FakeEmbedder::ok(),
            FakeVector::with(vec![scored("s-low", 0.75), scored("s-high", 0.95)]),
            FakeKeyword::with(vec![
                section("k-1", "g-afm", "Video Mode"),
                section("k-2", "g-afm", "Super Jets"),
            ]),
        );
        let results = retriever
            .retrieve("modes", None, RetrievalOptions::default())
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["s-high", "s-low", "k-1", "k-2"]);
        let mut last = f64::INFINITY;
        for result in &results {
            match result.source {
                Source::Vector => {
                    let similarity = result.similarity.unwrap();
                    assert!(similarity <= last);
                    last = similarity;
                }
                Source::Keyword => assert!(result.similarity.is_none()),
            }
        }
    }

    #[tokio::test]
    async fn below_threshold_vector_hits_are_excluded() {
        let (retriever, _, _) = retriever(
            FakeEmbedder::ok(),
            FakeVector::with(vec![scored("s-weak", 0.55), scored("s-strong", 0.88)]),
            FakeKeyword::with(vec![]),
        );
        let results = retriever
            .retrieve("jackpot", None, RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "s-strong");
    }

    #[tokio::test]
    async fn keyword_failure_degrades_to_vector_only() {
        let (retriever, _, _) = retriever(
            FakeEmbedder::ok(),
            FakeVector::with(vec![scored("s-1", 0.9)]),
            FakeKeyword::failing(),
        );
        let results = retriever
            .retrieve("multiball", None, RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, Source::Vector);
    }

    #[tokio::test]
    async fn vector_failure_degrades_to_keyword_only() {
        let (retriever, _, _) = retriever(
            FakeEmbedder::ok(),
            FakeVector::failing(),
            FakeKeyword::with(vec![section("k-1", "g-afm", "Wizard Mode")]),
        );
        let results = retriever
            .retrieve("rule the universe", None, RetrievalOptions::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, Source::Keyword);
    }

    #[tokio::test]
    async fn both_backends_failing_is_fatal() {
        let (retriever, _, _) = retriever(
            FakeEmbedder::ok(),
            FakeVector::failing(),
            FakeKeyword::failing(),
        );
        let err = retriever
            .retrieve("anything", None, RetrievalOptions::default())
            .await
            .expect_err("no backend left");
        assert!(matches!(err, RetrievalError::BackendsUnavailable { .. }));
    }

    #[tokio::test]
    async fn embedding_failure_is_fatal() {
        let (retriever, vector, _) = retriever(
            FakeEmbedder::failing(),
            FakeVector::with(vec![scored("s-1", 0.9)]),
            FakeKeyword::with(vec![]),
        );
        let err = retriever
            .retrieve("anything", None, RetrievalOptions::default())
            .await
            .expect_err("embedding is mandatory");
        assert!(matches!(err, RetrievalError::Embedding(_)));
        assert!(vector.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_limit_short_circuits_without_backend_calls() {
        let (retriever, vector, keyword) = retriever(
            FakeEmbedder::ok(),
            FakeVector::with(vec![scored("s-1", 0.9)]),
            FakeKeyword::with(vec![section("k-1", "g-afm", "Skill Shot")]),
        );
        let results = retriever
            .retrieve(
                "skill shot",
                None,
                RetrievalOptions {
                    limit: 0,
                    ..RetrievalOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(vector.calls.lock().unwrap().is_empty());
        assert!(keyword.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn merged_list_truncates_to_limit() {
        let (retriever, _, _) = retriever(
            FakeEmbedder::ok(),
            FakeVector::with(vec![scored("v-1", 0.95), scored("v-2", 0.9)]),
            FakeKeyword::with(vec![
                section("k-1", "g-afm", "A"),
                section("k-2", "g-afm", "B"),
            ]),
        );
        let results = retriever
            .retrieve(
                "rules",
                None,
                RetrievalOptions {
                    limit: 3,
                    ..RetrievalOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn game_scope_reaches_both_backends() {
        let mut other = section("other-1", "g-mm", "Trolls!");
        other.game_title = "Medieval Madness".to_string();
        let (retriever, vector, keyword) = retriever(
            FakeEmbedder::ok(),
            FakeVector::with(vec![scored("s-1", 0.9)]),
            FakeKeyword::with(vec![other, section("k-1", "g-afm", "Martian Attack")]),
        );
        let results = retriever
            .retrieve("attack", Some("g-afm"), RetrievalOptions::default())
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.id != "other-1"));
        assert_eq!(
            vector.calls.lock().unwrap()[0].game_id.as_deref(),
            Some("g-afm")
        );
        assert_eq!(keyword.calls.lock().unwrap()[0].0.as_deref(), Some("g-afm"));
    }

    #[tokio::test]
    async fn empty_backends_yield_empty_success() {
        let (retriever, _, _) = retriever(
            FakeEmbedder::ok(),
            FakeVector::with(vec![]),
            FakeKeyword::with(vec![]),
        );
        let results = retriever
            .retrieve("nothing indexed", None, RetrievalOptions::default())
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn keyword_only_tags_every_result_keyword() {
        let (retriever, _, _) = retriever(
            FakeEmbedder::ok(),
            FakeVector::with(vec![scored("s-1", 0.9)]),
            FakeKeyword::with(vec![section("k-1", "g-afm", "Bonus Count")]),
        );
        let results = retriever.keyword_only("bonus", None, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, Source::Keyword);
        assert!(results[0].similarity.is_none());
    }
}
