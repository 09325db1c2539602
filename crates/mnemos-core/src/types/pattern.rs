//! Pattern types: durable memory units and their evidence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::turn::TurnRole;

/// Rate applied to the boost when reinforcing an existing pattern.
pub const REINFORCEMENT_RATE: f32 = 0.5;

/// Kind of claim a pattern records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PatternKind {
    Behavior,
    Emotion,
    Belief,
    Goal,
    Preference,
    Temporal,
    Causal,
    Fact,
    /// One-off occurrence; receives a forward expiry on insert.
    Event,
}

/// Lifecycle status. Patterns are never physically deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PatternStatus {
    Active,
    Disputed,
    Superseded,
}

/// Whether a claim was directly stated or inferred.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SignalStrength {
    #[default]
    Explicit,
    Implicit,
}

/// A durable memory unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub content: String,
    pub kind: PatternKind,
    pub confidence: f32,
    /// Reinforcement count; starts at 1.
    pub strength: u32,
    pub status: PatternStatus,
    pub canonical_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Pattern {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Active and not expired: eligible for exact and semantic matching.
    pub fn is_matchable(&self, now: DateTime<Utc>) -> bool {
        self.status == PatternStatus::Active && !self.is_expired(now)
    }
}

/// A pattern about to be inserted.
#[derive(Debug, Clone)]
pub struct NewPattern {
    pub content: String,
    pub kind: PatternKind,
    pub confidence: f32,
    pub canonical_hash: String,
    pub embedding: Option<Vec<f32>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub source_type: String,
    pub source_id: Option<String>,
}

/// A pattern returned from similarity search.
#[derive(Debug, Clone)]
pub struct ScoredPattern {
    pub pattern: Pattern,
    /// Cosine similarity to the query embedding.
    pub similarity: f32,
}

/// A candidate claim produced by extraction, before deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternCandidate {
    pub content: String,
    pub kind: PatternKind,
    pub confidence: f32,
    pub signal: SignalStrength,
}

impl PatternCandidate {
    pub fn new(content: impl Into<String>, kind: PatternKind, confidence: f32) -> Self {
        Self {
            content: content.into(),
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            signal: SignalStrength::Explicit,
        }
    }

    pub fn implicit(mut self) -> Self {
        self.signal = SignalStrength::Implicit;
        self
    }
}

/// One turn cited as evidence for a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub turn_id: i64,
    pub role: TurnRole,
}

/// Evidence binding a pattern to the turns that justified it. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternObservation {
    pub pattern_id: String,
    pub evidence: Vec<Evidence>,
    pub confidence: f32,
    pub signal: SignalStrength,
    pub source_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl PatternObservation {
    pub fn turn_ids(&self) -> Vec<i64> {
        self.evidence.iter().map(|e| e.turn_id).collect()
    }
}

/// Drop assistant-authored evidence. An empty result means the claim has no
/// admissible support.
pub fn admissible_evidence(evidence: &[Evidence]) -> Vec<Evidence> {
    evidence
        .iter()
        .copied()
        .filter(|e| e.role.is_evidence())
        .collect()
}

/// Confidence after reinforcing `old` with a boost in [0, 1].
///
/// Moves a fraction of the remaining headroom, so repeated reinforcement
/// approaches but never exceeds 1.0.
pub fn reinforce_confidence(old: f32, boost: f32) -> f32 {
    let old = old.clamp(0.0, 1.0);
    let boost = boost.clamp(0.0, 1.0);
    (old + (1.0 - old) * boost * REINFORCEMENT_RATE).clamp(0.0, 1.0)
}
