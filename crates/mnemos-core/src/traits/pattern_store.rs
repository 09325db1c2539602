//! Pattern store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MnemosResult;
use crate::types::{NewPattern, Pattern, PatternObservation, PatternStatus, ScoredPattern};

/// Audit record for one retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalLogEntry {
    pub query: String,
    pub pattern_ids: Vec<String>,
    pub scores: Vec<f32>,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
}

/// Persisted memory units, keyed by id or canonical hash.
///
/// `now` is passed explicitly wherever expiry matters so callers and tests
/// control the clock.
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Active, non-expired pattern with this canonical hash.
    async fn find_active_by_hash(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> MnemosResult<Option<Pattern>>;

    /// Top-`limit` active, non-expired patterns whose embedding similarity
    /// to `embedding` is at least `min_similarity`, most similar first.
    async fn search_similar(
        &self,
        embedding: &[f32],
        limit: usize,
        min_similarity: f32,
        now: DateTime<Utc>,
    ) -> MnemosResult<Vec<ScoredPattern>>;

    async fn insert(&self, pattern: NewPattern) -> MnemosResult<Pattern>;

    async fn get(&self, id: &str) -> MnemosResult<Option<Pattern>>;

    /// Boost confidence and bump strength. Returns the updated pattern.
    async fn reinforce(&self, id: &str, boost: f32) -> MnemosResult<Pattern>;

    /// Record an alternative phrasing of an existing pattern.
    async fn add_alias(&self, id: &str, alias: &str) -> MnemosResult<()>;

    async fn update_status(&self, id: &str, status: PatternStatus) -> MnemosResult<()>;

    async fn insert_observation(&self, observation: PatternObservation) -> MnemosResult<()>;

    /// Associate a pattern with an external record.
    async fn link_entry(&self, pattern_id: &str, entry_type: &str, entry_id: &str)
        -> MnemosResult<()>;

    /// Highest-ranked active patterns, used for extraction cross-reference.
    async fn top_patterns(&self, limit: usize) -> MnemosResult<Vec<Pattern>>;

    /// Active event-kind patterns whose expiry has passed.
    async fn count_stale_events(&self, now: DateTime<Utc>) -> MnemosResult<usize>;

    async fn log_retrieval(&self, entry: RetrievalLogEntry) -> MnemosResult<()>;
}
