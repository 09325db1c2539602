//! Configuration for retrieval and MMR reranking.

use serde::{Deserialize, Serialize};

/// Floors, budget and diversity weight for working-memory assembly.
///
/// Short queries get stricter floors: a two-word phrase is more likely to
/// over-match generic patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a search candidate. Default: 0.30
    pub similarity_floor: f32,
    /// Similarity floor for short queries. Default: 0.45
    pub short_query_similarity_floor: f32,
    /// Minimum final score after reranking. Default: 0.25
    pub score_floor: f32,
    /// Score floor for short queries. Default: 0.40
    pub short_query_score_floor: f32,
    /// Queries with at most this many words count as short. Default: 4
    pub short_query_words: usize,
    /// Candidates fetched from the store. Default: 20
    pub candidate_limit: usize,
    /// Relevance weight in MMR; 1.0 ignores diversity. Default: 0.7
    pub mmr_lambda: f32,
    /// Token budget for the working set (~4 chars per token). Default: 600
    pub pattern_token_budget: usize,
    /// Queries shorter than this many characters skip retrieval. Default: 4
    pub min_query_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_floor: 0.30,
            short_query_similarity_floor: 0.45,
            score_floor: 0.25,
            short_query_score_floor: 0.40,
            short_query_words: 4,
            candidate_limit: 20,
            mmr_lambda: 0.7,
            pattern_token_budget: 600,
            min_query_chars: 4,
        }
    }
}

impl RetrievalConfig {
    pub fn char_budget(&self) -> usize {
        self.pattern_token_budget * 4
    }

    /// Similarity and score floors for a query with `word_count` words.
    pub fn floors_for(&self, word_count: usize) -> (f32, f32) {
        if word_count <= self.short_query_words {
            (self.short_query_similarity_floor, self.short_query_score_floor)
        } else {
            (self.similarity_floor, self.score_floor)
        }
    }

    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        for floor in [
            self.similarity_floor,
            self.short_query_similarity_floor,
            self.score_floor,
            self.short_query_score_floor,
        ] {
            if !(0.0..=1.0).contains(&floor) {
                return Err("retrieval floors must be between 0.0 and 1.0");
            }
        }
        if !(0.0..=1.0).contains(&self.mmr_lambda) {
            return Err("mmr_lambda must be between 0.0 and 1.0");
        }
        if self.candidate_limit == 0 {
            return Err("candidate_limit must be at least 1");
        }
        if self.pattern_token_budget == 0 {
            return Err("pattern_token_budget must be at least 1");
        }
        Ok(())
    }
}
