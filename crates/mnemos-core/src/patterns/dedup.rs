//! Tiered deduplication for extracted patterns.
//!
//! Every write goes through the same tiers: evidence filtering, exact
//! canonical hash, semantic nearest neighbor (with numeric-conflict
//! override), then insertion.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::canonical::canonical_hash;
use super::numeric::numeric_conflict;
use crate::compaction::CompactionConfig;
use crate::error::{MnemosError, MnemosResult};
use crate::traits::{Embedder, EmbeddingPurpose, PatternStore};
use crate::types::{
    admissible_evidence, Evidence, NewPattern, PatternCandidate, PatternKind, PatternObservation,
    PatternStatus, SignalStrength,
};

/// Thresholds used by the tiers.
#[derive(Debug, Clone)]
pub struct DedupSettings {
    pub semantic_floor: f32,
    pub numeric_epsilon: f64,
    pub implicit_signal_factor: f32,
    pub event_ttl: chrono::Duration,
}

impl From<&CompactionConfig> for DedupSettings {
    fn from(config: &CompactionConfig) -> Self {
        Self {
            semantic_floor: config.semantic_dedup_floor,
            numeric_epsilon: config.numeric_conflict_epsilon,
            implicit_signal_factor: config.implicit_signal_factor,
            event_ttl: config.event_ttl(),
        }
    }
}

impl Default for DedupSettings {
    fn default() -> Self {
        Self::from(&CompactionConfig::default())
    }
}

/// What a write did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No admissible evidence; nothing written.
    Skipped,
    /// An active pattern already has this canonical hash; nothing written.
    Duplicate { pattern_id: String },
    /// A near-duplicate was reinforced and the text recorded as its alias.
    Reinforced { pattern_id: String },
    /// A conflicting numeric fact was retired and a new pattern inserted.
    Superseded { old_id: String, new_id: String },
    Inserted { pattern_id: String },
}

impl UpsertOutcome {
    /// The pattern now carrying the claim, if any.
    pub fn pattern_id(&self) -> Option<&str> {
        match self {
            UpsertOutcome::Skipped => None,
            UpsertOutcome::Duplicate { pattern_id }
            | UpsertOutcome::Reinforced { pattern_id }
            | UpsertOutcome::Inserted { pattern_id } => Some(pattern_id),
            UpsertOutcome::Superseded { new_id, .. } => Some(new_id),
        }
    }
}

/// Source recorded on patterns and observations written by a writer.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_type: String,
    pub source_id: Option<String>,
}

impl Provenance {
    pub fn new(source_type: impl Into<String>, source_id: Option<String>) -> Self {
        Self {
            source_type: source_type.into(),
            source_id,
        }
    }
}

/// Applies candidate claims to the pattern store.
pub struct PatternWriter {
    store: Arc<dyn PatternStore>,
    embedder: Option<Arc<dyn Embedder>>,
    settings: DedupSettings,
}

impl PatternWriter {
    pub fn new(
        store: Arc<dyn PatternStore>,
        embedder: Option<Arc<dyn Embedder>>,
        settings: DedupSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            settings,
        }
    }

    fn observation_confidence(&self, confidence: f32, signal: SignalStrength) -> f32 {
        match signal {
            SignalStrength::Explicit => confidence,
            SignalStrength::Implicit => confidence * self.settings.implicit_signal_factor,
        }
    }

    async fn embed(&self, content: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(content, Some(EmbeddingPurpose::Store)).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "Embedding failed; skipping semantic dedup tier");
                None
            }
        }
    }

    /// Write `candidate` through the dedup tiers.
    pub async fn upsert(
        &self,
        candidate: &PatternCandidate,
        evidence: &[Evidence],
        provenance: &Provenance,
        now: DateTime<Utc>,
    ) -> MnemosResult<UpsertOutcome> {
        self.write(candidate, evidence, provenance, now, None).await
    }

    /// The tiers, ignoring `retiring` as a match. A pattern is retired only
    /// after the write that replaces it has succeeded.
    async fn write(
        &self,
        candidate: &PatternCandidate,
        evidence: &[Evidence],
        provenance: &Provenance,
        now: DateTime<Utc>,
        retiring: Option<&str>,
    ) -> MnemosResult<UpsertOutcome> {
        let evidence = admissible_evidence(evidence);
        if evidence.is_empty() {
            debug!(
                content = %candidate.content,
                "Skipping candidate without user or tool evidence"
            );
            return Ok(UpsertOutcome::Skipped);
        }
        let is_retiring = |id: &str| retiring == Some(id);

        let hash = canonical_hash(&candidate.content);
        if let Some(existing) = self.store.find_active_by_hash(&hash, now).await? {
            if !is_retiring(&existing.id) {
                debug!(pattern_id = %existing.id, "Exact duplicate");
                return Ok(UpsertOutcome::Duplicate {
                    pattern_id: existing.id,
                });
            }
        }

        let embedding = self.embed(&candidate.content).await;
        let mut conflicting = None;

        if let Some(embedding) = embedding.as_deref() {
            let nearest = self
                .store
                .search_similar(embedding, 2, self.settings.semantic_floor, now)
                .await?
                .into_iter()
                .find(|scored| !is_retiring(&scored.pattern.id));

            if let Some(nearest) = nearest {
                let matched = nearest.pattern;
                if let Some(kind) = numeric_conflict(
                    &candidate.content,
                    &matched.content,
                    self.settings.numeric_epsilon,
                ) {
                    info!(
                        pattern_id = %matched.id,
                        quantity = ?kind,
                        "Numeric fact changed; superseding"
                    );
                    conflicting = Some(matched.id);
                } else {
                    self.store
                        .reinforce(&matched.id, candidate.confidence)
                        .await?;
                    self.store
                        .add_alias(&matched.id, &candidate.content)
                        .await?;
                    self.record_observation(
                        &matched.id,
                        evidence,
                        candidate.confidence,
                        candidate.signal,
                        provenance,
                    )
                    .await?;
                    debug!(
                        pattern_id = %matched.id,
                        similarity = nearest.similarity,
                        "Reinforced near-duplicate"
                    );
                    return Ok(UpsertOutcome::Reinforced {
                        pattern_id: matched.id,
                    });
                }
            }
        }

        let expires_at =
            (candidate.kind == PatternKind::Event).then(|| now + self.settings.event_ttl);
        let inserted = self
            .store
            .insert(NewPattern {
                content: candidate.content.clone(),
                kind: candidate.kind,
                confidence: candidate.confidence,
                canonical_hash: hash,
                embedding,
                expires_at,
                source_type: provenance.source_type.clone(),
                source_id: provenance.source_id.clone(),
            })
            .await?;
        self.record_observation(
            &inserted.id,
            evidence,
            candidate.confidence,
            candidate.signal,
            provenance,
        )
        .await?;

        match conflicting {
            Some(old_id) => {
                self.store
                    .update_status(&old_id, PatternStatus::Superseded)
                    .await?;
                Ok(UpsertOutcome::Superseded {
                    old_id,
                    new_id: inserted.id,
                })
            }
            None => Ok(UpsertOutcome::Inserted {
                pattern_id: inserted.id,
            }),
        }
    }

    /// Reinforce a known pattern id. Returns `false` when filtering left no
    /// evidence or the pattern is no longer active.
    pub async fn reinforce_existing(
        &self,
        pattern_id: &str,
        confidence: f32,
        signal: SignalStrength,
        evidence: &[Evidence],
        provenance: &Provenance,
    ) -> MnemosResult<bool> {
        let evidence = admissible_evidence(evidence);
        if evidence.is_empty() {
            return Ok(false);
        }
        let Some(pattern) = self.store.get(pattern_id).await? else {
            warn!(pattern_id, "Reinforcement targets unknown pattern");
            return Ok(false);
        };
        if pattern.status != PatternStatus::Active {
            return Ok(false);
        }

        self.store.reinforce(pattern_id, confidence).await?;
        self.record_observation(pattern_id, evidence, confidence, signal, provenance)
            .await?;
        Ok(true)
    }

    /// Mark a pattern disputed. Returns `false` for unknown ids.
    pub async fn dispute(&self, pattern_id: &str) -> MnemosResult<bool> {
        match self
            .store
            .update_status(pattern_id, PatternStatus::Disputed)
            .await
        {
            Ok(()) => Ok(true),
            Err(MnemosError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Write `replacement` through the dedup tiers, then retire `old_id`.
    ///
    /// The old pattern is left untouched when the replacement has no
    /// admissible evidence or could not be written.
    pub async fn supersede(
        &self,
        old_id: &str,
        replacement: &PatternCandidate,
        evidence: &[Evidence],
        provenance: &Provenance,
        now: DateTime<Utc>,
    ) -> MnemosResult<Option<UpsertOutcome>> {
        if admissible_evidence(evidence).is_empty() {
            return Ok(None);
        }
        if self.store.get(old_id).await?.is_none() {
            warn!(pattern_id = old_id, "Supersession targets unknown pattern");
            return Ok(None);
        }

        let outcome = self
            .write(replacement, evidence, provenance, now, Some(old_id))
            .await?;
        self.store
            .update_status(old_id, PatternStatus::Superseded)
            .await?;
        Ok(Some(outcome))
    }

    async fn record_observation(
        &self,
        pattern_id: &str,
        evidence: Vec<Evidence>,
        confidence: f32,
        signal: SignalStrength,
        provenance: &Provenance,
    ) -> MnemosResult<()> {
        self.store
            .insert_observation(PatternObservation {
                pattern_id: pattern_id.to_string(),
                evidence,
                confidence: self.observation_confidence(confidence, signal),
                signal,
                source_type: provenance.source_type.clone(),
                source_id: provenance.source_id.clone(),
            })
            .await
    }
}
