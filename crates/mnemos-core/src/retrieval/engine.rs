//! Working-memory assembly: prefilter, search, MMR, floors and budget.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::config::RetrievalConfig;
use super::mmr::{mmr_order, MmrInput};
use super::prefilter::{should_skip, SkipReason};
use crate::error::MnemosResult;
use crate::traits::{Embedder, EmbeddingPurpose, PatternStore, RetrievalLogEntry};
use crate::types::Pattern;

/// Share of relevance that depends on similarity alone; the rest scales
/// with pattern confidence.
const SIMILARITY_WEIGHT: f32 = 0.7;

/// Annotation shown to the consumer when memory could not be consulted.
pub const DEGRADED_NOTICE: &str =
    "(Memory lookup failed for this message; remembered context may be incomplete.)";

/// A pattern selected for the working set.
#[derive(Debug, Clone)]
pub struct RankedPattern {
    pub pattern: Pattern,
    pub similarity: f32,
    /// Relevance used by MMR and the score floor.
    pub score: f32,
}

/// Result of one retrieval.
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    /// Selected patterns, best first.
    pub patterns: Vec<RankedPattern>,
    /// Embedding or search failed; the working set is knowingly incomplete.
    pub degraded: bool,
    /// Set when the prefilter skipped retrieval.
    pub skipped: Option<SkipReason>,
}

impl RetrievalOutcome {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    fn degraded() -> Self {
        Self {
            degraded: true,
            ..Default::default()
        }
    }

    pub fn pattern_ids(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.pattern.id.clone()).collect()
    }

    /// Render the working set for a system prompt. `None` when there is
    /// nothing to say.
    pub fn to_prompt_section(&self) -> Option<String> {
        if self.patterns.is_empty() && !self.degraded {
            return None;
        }

        let mut section = String::from("## What you remember about the user\n");
        for ranked in &self.patterns {
            section.push_str(&format_line(&ranked.pattern));
            section.push('\n');
        }
        if self.degraded {
            section.push_str(DEGRADED_NOTICE);
            section.push('\n');
        }
        Some(section)
    }
}

fn format_line(pattern: &Pattern) -> String {
    format!("- [{}] {}", pattern.kind, pattern.content)
}

fn relevance(similarity: f32, confidence: f32) -> f32 {
    similarity * (SIMILARITY_WEIGHT + (1.0 - SIMILARITY_WEIGHT) * confidence.clamp(0.0, 1.0))
}

/// Selects, diversifies and budget-caps patterns for a query.
pub struct Retriever {
    store: Arc<dyn PatternStore>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn PatternStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve the working set for `query`. Never fails: pipeline errors
    /// yield an empty, degraded outcome.
    pub async fn retrieve(&self, query: &str) -> RetrievalOutcome {
        self.retrieve_at(query, Utc::now()).await
    }

    pub async fn retrieve_at(&self, query: &str, now: DateTime<Utc>) -> RetrievalOutcome {
        if let Some(reason) = should_skip(query, self.config.min_query_chars) {
            debug!(?reason, "Skipping retrieval");
            return RetrievalOutcome::skipped(reason);
        }

        let started = Instant::now();
        let outcome = match self.search(query, now).await {
            Ok(patterns) => RetrievalOutcome {
                patterns,
                degraded: false,
                skipped: None,
            },
            Err(e) => {
                warn!(error = %e, "Retrieval failed; continuing without memory");
                RetrievalOutcome::degraded()
            }
        };

        info!(
            selected = outcome.patterns.len(),
            degraded = outcome.degraded,
            duration_ms = started.elapsed().as_millis() as u64,
            "Retrieval complete"
        );

        let entry = RetrievalLogEntry {
            query: query.to_string(),
            pattern_ids: outcome.pattern_ids(),
            scores: outcome.patterns.iter().map(|p| p.score).collect(),
            degraded: outcome.degraded,
            created_at: now,
        };
        if let Err(e) = self.store.log_retrieval(entry).await {
            warn!(error = %e, "Failed to write retrieval log");
        }

        outcome
    }

    async fn search(&self, query: &str, now: DateTime<Utc>) -> MnemosResult<Vec<RankedPattern>> {
        let word_count = query.split_whitespace().count();
        let (similarity_floor, score_floor) = self.config.floors_for(word_count);

        let embedding = self
            .embedder
            .embed(query, Some(EmbeddingPurpose::Query))
            .await?;
        let candidates = self
            .store
            .search_similar(&embedding, self.config.candidate_limit, similarity_floor, now)
            .await?;

        let ranked: Vec<RankedPattern> = candidates
            .into_iter()
            .map(|c| RankedPattern {
                score: relevance(c.similarity, c.pattern.confidence),
                similarity: c.similarity,
                pattern: c.pattern,
            })
            .collect();

        let inputs: Vec<MmrInput> = ranked
            .iter()
            .map(|r| MmrInput {
                relevance: r.score,
                query_similarity: r.similarity,
            })
            .collect();
        let order = mmr_order(&inputs, self.config.mmr_lambda);

        let mut slots: Vec<Option<RankedPattern>> = ranked.into_iter().map(Some).collect();
        let budget = self.config.char_budget();
        let mut used = 0;
        let mut selected = Vec::new();

        for idx in order {
            let Some(candidate) = slots[idx].take() else {
                continue;
            };
            if candidate.score < score_floor {
                continue;
            }
            let cost = format_line(&candidate.pattern).chars().count() + 1;
            if used + cost > budget {
                break;
            }
            used += cost;
            selected.push(candidate);
        }

        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MnemosError;
    use crate::store::SqliteStore;
    use crate::types::{NewPattern, PatternKind};
    use async_trait::async_trait;

    /// Maps known words onto fixed axes so similarities are predictable.
    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str, _: Option<EmbeddingPurpose>) -> MnemosResult<Vec<f32>> {
            let text = text.to_lowercase();
            let axis = |word: &str| if text.contains(word) { 1.0 } else { 0.0 };
            Ok(vec![axis("tea"), axis("coffee"), axis("run"), 0.1])
        }
        fn dimension(&self) -> usize {
            4
        }
        fn model_name(&self) -> &str {
            "axis"
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _: &str, _: Option<EmbeddingPurpose>) -> MnemosResult<Vec<f32>> {
            Err(MnemosError::embedding("service unavailable"))
        }
        fn dimension(&self) -> usize {
            4
        }
        fn model_name(&self) -> &str {
            "failing"
        }
    }

    async fn seed(store: &SqliteStore, content: &str, confidence: f32) {
        let embedding = AxisEmbedder.embed(content, None).await.unwrap();
        store
            .insert(NewPattern {
                content: content.to_string(),
                kind: PatternKind::Preference,
                confidence,
                canonical_hash: content.to_string(),
                embedding: Some(embedding),
                expires_at: None,
                source_type: "test".to_string(),
                source_id: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_relevant_patterns_selected_and_logged() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        seed(&store, "drinks green tea every evening", 0.9).await;
        seed(&store, "goes for a run on sundays", 0.9).await;

        let retriever = Retriever::new(
            store.clone(),
            Arc::new(AxisEmbedder),
            RetrievalConfig::default(),
        );
        let outcome = retriever
            .retrieve("which tea should I buy for the weekend")
            .await;

        assert!(!outcome.degraded);
        assert_eq!(outcome.patterns.len(), 1);
        assert!(outcome.patterns[0].pattern.content.contains("tea"));
        assert_eq!(store.retrieval_log_count().unwrap(), 1);

        let section = outcome.to_prompt_section().unwrap();
        assert!(section.contains("- [preference] drinks green tea every evening"));
        assert!(!section.contains(DEGRADED_NOTICE));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_degraded_not_error() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let retriever = Retriever::new(
            store,
            Arc::new(FailingEmbedder),
            RetrievalConfig::default(),
        );
        let outcome = retriever.retrieve("what do I usually drink at night").await;

        assert!(outcome.degraded);
        assert!(outcome.patterns.is_empty());
        assert!(outcome.to_prompt_section().unwrap().contains(DEGRADED_NOTICE));
    }

    #[tokio::test]
    async fn test_prefilter_skips_without_logging() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let retriever = Retriever::new(
            store.clone(),
            Arc::new(FailingEmbedder),
            RetrievalConfig::default(),
        );
        let outcome = retriever.retrieve("thanks!").await;

        assert_eq!(outcome.skipped, Some(SkipReason::Acknowledgement));
        assert!(!outcome.degraded);
        assert!(outcome.to_prompt_section().is_none());
        assert_eq!(store.retrieval_log_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_budget_stops_instead_of_truncating() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        seed(&store, "loves oolong tea", 0.9).await;
        seed(&store, "prefers tea without sugar and with a slice of lemon", 0.8).await;

        let config = RetrievalConfig {
            pattern_token_budget: 8,
            mmr_lambda: 1.0,
            ..Default::default()
        };
        let retriever = Retriever::new(store, Arc::new(AxisEmbedder), config);
        let outcome = retriever.retrieve("tell me about my tea habits please").await;

        assert_eq!(outcome.patterns.len(), 1);
        assert_eq!(outcome.patterns[0].pattern.content, "loves oolong tea");
    }

    #[tokio::test]
    async fn test_short_query_uses_stricter_score_floor() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        seed(&store, "tea", 0.0).await;

        // Full similarity, but zero confidence caps relevance at 0.70.
        let config = RetrievalConfig {
            short_query_score_floor: 0.75,
            ..Default::default()
        };
        let retriever = Retriever::new(store, Arc::new(AxisEmbedder), config);
        assert!(retriever.retrieve("tea again").await.patterns.is_empty());
        assert_eq!(
            retriever
                .retrieve("remind me what kind of tea I have")
                .await
                .patterns
                .len(),
            1
        );
    }
}
