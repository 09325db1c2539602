//! Compaction: consolidate buffered turns into durable patterns.
//!
//! A pass runs at most once at a time across all conversations. It extracts
//! claims from the oldest half of a conversation's uncompacted turns, writes
//! them through the tiered dedup, and marks those turns consumed whether or
//! not extraction succeeded.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{CompactionConfig, COMPACTION_LOCK_KEY};
use super::json_parser::{parse_extraction, Extraction};
use super::prompts::{build_extraction_message, extraction_system_prompt};
use crate::error::MnemosResult;
use crate::patterns::{DedupSettings, PatternWriter, Provenance, UpsertOutcome};
use crate::tools::{parse_measurement_reference, LOG_MEASUREMENT_TOOL, MEASUREMENT_ENTRY_TYPE};
use crate::traits::{
    CompactionNotifier, Embedder, ExclusiveLock, GenerationOptions, Llm, PatternStore,
    ResponseFormat, TurnStore,
};
use crate::types::{estimate_tokens, Evidence, Message, Turn, TurnRole};

/// Provenance source type for patterns written by compaction.
pub const COMPACTION_SOURCE: &str = "compaction";

/// Why a pass was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionTrigger {
    /// Buffered turns exceed the token budget.
    TokenBudget,
    /// Enough turns and the interval since the last pass has elapsed.
    Interval,
    /// Requested explicitly.
    Forced,
}

/// Counts from one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    pub conversation_id: String,
    pub turns_compacted: usize,
    pub saved: usize,
    pub reinforced: usize,
    pub disputed: usize,
    pub superseded: usize,
    pub duplicates: usize,
    /// Items dropped for lack of evidence or an unknown target.
    pub skipped: usize,
    /// Active event patterns past their expiry.
    pub stale_events: usize,
    /// The reasoning engine failed or returned unusable output.
    pub extraction_failed: bool,
}

impl CompactionReport {
    fn changed(&self) -> bool {
        self.saved + self.reinforced + self.disputed + self.superseded > 0
    }

    /// Human-readable summary, or `None` when there is nothing to report.
    pub fn summary(&self) -> Option<String> {
        if !self.changed() && self.stale_events == 0 {
            return None;
        }
        let mut summary = format!(
            "Memory updated: {} saved, {} reinforced, {} disputed, {} superseded.",
            self.saved, self.reinforced, self.disputed, self.superseded
        );
        if self.stale_events > 0 {
            summary.push_str(&format!(
                " {} past event{} pending review.",
                self.stale_events,
                if self.stale_events == 1 { "" } else { "s" }
            ));
        }
        Some(summary)
    }
}

/// Result of asking for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// No trigger condition holds.
    NotDue,
    /// Another pass holds the lock; nothing changed.
    Skipped,
    Completed(CompactionReport),
}

/// Runs compaction passes.
pub struct CompactionEngine {
    turns: Arc<dyn TurnStore>,
    patterns: Arc<dyn PatternStore>,
    lock: Arc<dyn ExclusiveLock>,
    llm: Arc<dyn Llm>,
    writer: PatternWriter,
    notifier: Option<Arc<dyn CompactionNotifier>>,
    config: CompactionConfig,
    holder: String,
}

impl CompactionEngine {
    pub fn new(
        turns: Arc<dyn TurnStore>,
        patterns: Arc<dyn PatternStore>,
        lock: Arc<dyn ExclusiveLock>,
        llm: Arc<dyn Llm>,
        embedder: Option<Arc<dyn Embedder>>,
        config: CompactionConfig,
    ) -> Self {
        let writer = PatternWriter::new(patterns.clone(), embedder, DedupSettings::from(&config));
        Self {
            turns,
            patterns,
            lock,
            llm,
            writer,
            notifier: None,
            config,
            holder: format!("compactor-{}", Uuid::new_v4()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn CompactionNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Which trigger, if any, currently holds for `conversation_id`.
    pub async fn due(
        &self,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> MnemosResult<Option<CompactionTrigger>> {
        let pending = self.turns.uncompacted(conversation_id).await?;
        let last = self.turns.last_compaction_at(conversation_id).await?;
        Ok(self.trigger_for(&pending, last, now))
    }

    fn trigger_for(
        &self,
        pending: &[Turn],
        last: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<CompactionTrigger> {
        let chars: usize = pending.iter().map(|t| t.content.chars().count()).sum();
        if estimate_tokens(chars) > self.config.token_budget {
            return Some(CompactionTrigger::TokenBudget);
        }
        let interval_elapsed = last.map_or(true, |at| now - at >= self.config.interval());
        if pending.len() >= self.config.min_turns_for_time_trigger && interval_elapsed {
            return Some(CompactionTrigger::Interval);
        }
        None
    }

    /// Run a pass if a trigger holds.
    pub async fn maybe_compact(&self, conversation_id: &str) -> MnemosResult<CompactionOutcome> {
        match self.due(conversation_id, Utc::now()).await? {
            Some(trigger) => self.run(conversation_id, trigger).await,
            None => Ok(CompactionOutcome::NotDue),
        }
    }

    /// Run a pass regardless of budget and interval, given a minimum of
    /// buffered turns.
    pub async fn force_compact(&self, conversation_id: &str) -> MnemosResult<CompactionOutcome> {
        let pending = self.turns.uncompacted(conversation_id).await?;
        if pending.len() < self.config.min_turns_for_force {
            return Ok(CompactionOutcome::NotDue);
        }
        self.run(conversation_id, CompactionTrigger::Forced).await
    }

    /// Check triggers and compact in the background. Errors are logged.
    pub fn schedule(self: &Arc<Self>, conversation_id: impl Into<String>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let conversation_id = conversation_id.into();
        tokio::spawn(async move {
            match engine.maybe_compact(&conversation_id).await {
                Ok(CompactionOutcome::Completed(report)) => {
                    debug!(
                        conversation_id = %conversation_id,
                        saved = report.saved,
                        "Scheduled compaction finished"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "Background compaction failed"
                    );
                }
            }
        })
    }

    async fn run(
        &self,
        conversation_id: &str,
        trigger: CompactionTrigger,
    ) -> MnemosResult<CompactionOutcome> {
        let acquired = self
            .lock
            .try_acquire(COMPACTION_LOCK_KEY, &self.holder, self.config.lock_stale_after())
            .await?;
        if !acquired {
            info!(conversation_id, ?trigger, "Compaction lock held elsewhere; skipping");
            return Ok(CompactionOutcome::Skipped);
        }

        let result = self.run_locked(conversation_id, trigger).await;

        if let Err(e) = self.lock.release(COMPACTION_LOCK_KEY, &self.holder).await {
            error!(error = %e, "Failed to release compaction lock");
        }
        result
    }

    async fn run_locked(
        &self,
        conversation_id: &str,
        trigger: CompactionTrigger,
    ) -> MnemosResult<CompactionOutcome> {
        let started = Instant::now();
        let now = Utc::now();

        // Another pass may have consumed the buffer since the trigger was read.
        let pending = self.turns.uncompacted(conversation_id).await?;
        let still_due = match trigger {
            CompactionTrigger::Forced => pending.len() >= self.config.min_turns_for_force,
            _ => {
                let last = self.turns.last_compaction_at(conversation_id).await?;
                self.trigger_for(&pending, last, now).is_some()
            }
        };
        if !still_due || pending.is_empty() {
            debug!(conversation_id, "Nothing to compact after re-read");
            return Ok(CompactionOutcome::NotDue);
        }

        let slice = &pending[..pending.len().div_ceil(2)];
        let (extraction, extraction_failed) = self.extract(conversation_id, slice).await;

        let mut report = CompactionReport {
            conversation_id: conversation_id.to_string(),
            extraction_failed,
            ..Default::default()
        };
        self.apply(conversation_id, slice, &extraction, now, &mut report)
            .await;

        let ids: Vec<i64> = slice.iter().map(|t| t.id).collect();
        report.turns_compacted = self.turns.mark_compacted(&ids, now).await?;
        self.turns.set_last_compaction(conversation_id, now).await?;

        report.stale_events = match self.patterns.count_stale_events(now).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to count stale events");
                0
            }
        };

        info!(
            conversation_id,
            ?trigger,
            turns = report.turns_compacted,
            saved = report.saved,
            reinforced = report.reinforced,
            disputed = report.disputed,
            superseded = report.superseded,
            duplicates = report.duplicates,
            extraction_failed = report.extraction_failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Compaction complete"
        );

        if let (Some(notifier), Some(summary)) = (&self.notifier, report.summary()) {
            if let Err(e) = notifier.notify(conversation_id, &summary).await {
                warn!(conversation_id, error = %e, "Compaction notifier failed");
            }
        }

        Ok(CompactionOutcome::Completed(report))
    }

    /// Ask the reasoning engine for claims. Failures yield an empty extraction.
    async fn extract(&self, conversation_id: &str, slice: &[Turn]) -> (Extraction, bool) {
        let existing = match self
            .patterns
            .top_patterns(self.config.cross_reference_limit)
            .await
        {
            Ok(patterns) => patterns,
            Err(e) => {
                warn!(error = %e, "Failed to load patterns for cross-reference");
                Vec::new()
            }
        };

        let messages = vec![
            Message::system(extraction_system_prompt(self.config.max_new_patterns)),
            Message::user(build_extraction_message(slice, &existing)),
        ];
        let options = GenerationOptions {
            temperature: Some(0.0),
            response_format: Some(ResponseFormat::Json),
            ..Default::default()
        };

        let response = match self.llm.generate(&messages, Some(options)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    conversation_id,
                    error = %e,
                    "Extraction call failed; consuming turns without extraction"
                );
                return (Extraction::default(), true);
            }
        };

        match parse_extraction(response.content_or_empty(), self.config.max_new_patterns) {
            Ok(extraction) => (extraction, false),
            Err(e) => {
                warn!(
                    conversation_id,
                    error = %e,
                    "Malformed extraction output; treating as empty"
                );
                (Extraction::default(), true)
            }
        }
    }

    async fn apply(
        &self,
        conversation_id: &str,
        slice: &[Turn],
        extraction: &Extraction,
        now: DateTime<Utc>,
        report: &mut CompactionReport,
    ) {
        let by_id: HashMap<i64, &Turn> = slice.iter().map(|t| (t.id, t)).collect();
        let evidence_for = |ids: &[i64]| -> Vec<Evidence> {
            ids.iter()
                .filter_map(|id| by_id.get(id))
                .map(|t| Evidence {
                    turn_id: t.id,
                    role: t.role,
                })
                .collect()
        };
        let provenance = Provenance::new(COMPACTION_SOURCE, Some(conversation_id.to_string()));

        for item in &extraction.new_patterns {
            let evidence = evidence_for(&item.evidence);
            match self
                .writer
                .upsert(&item.to_candidate(), &evidence, &provenance, now)
                .await
            {
                Ok(outcome) => {
                    self.tally(&outcome, report);
                    self.link_entries(&outcome, &item.evidence, &by_id).await;
                }
                Err(e) => {
                    warn!(conversation_id, error = %e, "Failed to write extracted pattern");
                    report.skipped += 1;
                }
            }
        }

        for item in &extraction.reinforcements {
            let evidence = evidence_for(&item.evidence);
            match self
                .writer
                .reinforce_existing(
                    &item.pattern_id,
                    item.confidence,
                    item.signal,
                    &evidence,
                    &provenance,
                )
                .await
            {
                Ok(true) => report.reinforced += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(pattern_id = %item.pattern_id, error = %e, "Failed to reinforce pattern");
                    report.skipped += 1;
                }
            }
        }

        for item in &extraction.contradictions {
            match self.writer.dispute(&item.pattern_id).await {
                Ok(true) => report.disputed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    warn!(pattern_id = %item.pattern_id, error = %e, "Failed to dispute pattern");
                    report.skipped += 1;
                }
            }
        }

        for item in &extraction.supersessions {
            let evidence = evidence_for(&item.evidence);
            match self
                .writer
                .supersede(&item.old_pattern_id, &item.to_candidate(), &evidence, &provenance, now)
                .await
            {
                Ok(Some(outcome)) => {
                    report.superseded += 1;
                    if matches!(
                        outcome,
                        UpsertOutcome::Inserted { .. } | UpsertOutcome::Superseded { .. }
                    ) {
                        report.saved += 1;
                    }
                    self.link_entries(&outcome, &item.evidence, &by_id).await;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        pattern_id = %item.old_pattern_id,
                        error = %e,
                        "Failed to supersede pattern"
                    );
                    report.skipped += 1;
                }
            }
        }
    }

    fn tally(&self, outcome: &UpsertOutcome, report: &mut CompactionReport) {
        match outcome {
            UpsertOutcome::Skipped => report.skipped += 1,
            UpsertOutcome::Duplicate { .. } => report.duplicates += 1,
            UpsertOutcome::Reinforced { .. } => report.reinforced += 1,
            UpsertOutcome::Inserted { .. } => report.saved += 1,
            UpsertOutcome::Superseded { .. } => {
                report.saved += 1;
                report.superseded += 1;
            }
        }
    }

    /// Link measurements logged in evidence tool turns to the written pattern.
    async fn link_entries(
        &self,
        outcome: &UpsertOutcome,
        evidence: &[i64],
        by_id: &HashMap<i64, &Turn>,
    ) {
        let Some(pattern_id) = outcome.pattern_id() else {
            return;
        };
        let measurements = evidence
            .iter()
            .filter_map(|id| by_id.get(id))
            .filter(|t| {
                t.role == TurnRole::Tool && t.tool_name.as_deref() == Some(LOG_MEASUREMENT_TOOL)
            })
            .filter_map(|t| parse_measurement_reference(&t.content));

        for entry_id in measurements {
            if let Err(e) = self
                .patterns
                .link_entry(pattern_id, MEASUREMENT_ENTRY_TYPE, &entry_id.to_string())
                .await
            {
                warn!(pattern_id, entry_id, error = %e, "Failed to link measurement");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_and_stale_events() {
        let report = CompactionReport {
            saved: 2,
            reinforced: 1,
            superseded: 1,
            stale_events: 3,
            ..Default::default()
        };
        assert_eq!(
            report.summary().unwrap(),
            "Memory updated: 2 saved, 1 reinforced, 0 disputed, 1 superseded. 3 past events pending review."
        );
    }

    #[test]
    fn test_summary_silent_when_nothing_changed() {
        let report = CompactionReport {
            duplicates: 4,
            skipped: 1,
            ..Default::default()
        };
        assert!(report.summary().is_none());

        let stale_only = CompactionReport {
            stale_events: 1,
            ..Default::default()
        };
        assert!(stale_only.summary().unwrap().ends_with("1 past event pending review."));
    }
}
