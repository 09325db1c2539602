//! Periodic compaction sweep.
//!
//! Idle conversations never hit the per-turn trigger check, so a repeated
//! job walks every conversation with uncompacted turns and compacts the
//! ones that are due.

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

use super::engine::{CompactionEngine, CompactionOutcome};
use crate::error::MnemosResult;
use crate::traits::TurnStore;

/// Totals from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub checked: usize,
    pub compacted: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Check every conversation with pending turns once.
pub async fn sweep(engine: &CompactionEngine, turns: &dyn TurnStore) -> MnemosResult<SweepResult> {
    let mut result = SweepResult::default();
    for conversation_id in turns.conversations_with_pending().await? {
        result.checked += 1;
        match engine.maybe_compact(&conversation_id).await {
            Ok(CompactionOutcome::Completed(_)) => result.compacted += 1,
            Ok(CompactionOutcome::Skipped) => result.skipped += 1,
            Ok(CompactionOutcome::NotDue) => {}
            Err(e) => {
                error!(conversation_id = %conversation_id, error = %e, "Sweep compaction failed");
                result.failed += 1;
            }
        }
    }
    Ok(result)
}

/// Runs [`sweep`] on a fixed interval.
pub struct CompactionScheduler {
    scheduler: JobScheduler,
    engine: Arc<CompactionEngine>,
    turns: Arc<dyn TurnStore>,
    interval_minutes: u64,
}

impl CompactionScheduler {
    /// Note: call `start()` to begin periodic execution.
    pub async fn new(
        engine: Arc<CompactionEngine>,
        turns: Arc<dyn TurnStore>,
    ) -> MnemosResult<Self> {
        let interval_minutes = engine.config().sweep_interval_minutes.max(1);
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler,
            engine,
            turns,
            interval_minutes,
        })
    }

    pub fn interval_minutes(&self) -> u64 {
        self.interval_minutes
    }

    pub async fn start(&self) -> MnemosResult<()> {
        let engine = self.engine.clone();
        let turns = self.turns.clone();

        let job = Job::new_repeated_async(
            Duration::from_secs(self.interval_minutes * 60),
            move |_uuid, _lock| {
                let engine = engine.clone();
                let turns = turns.clone();
                Box::pin(async move {
                    debug!("Starting compaction sweep");
                    match sweep(&engine, turns.as_ref()).await {
                        Ok(result) => info!(
                            checked = result.checked,
                            compacted = result.compacted,
                            skipped = result.skipped,
                            failed = result.failed,
                            "Compaction sweep complete"
                        ),
                        Err(e) => error!(error = %e, "Compaction sweep failed"),
                    }
                })
            },
        )?;

        self.scheduler.add(job).await?;
        self.scheduler.start().await?;

        info!(
            interval_minutes = self.interval_minutes,
            "Compaction scheduler started"
        );
        Ok(())
    }

    pub async fn shutdown(&mut self) -> MnemosResult<()> {
        info!("Shutting down compaction scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    /// Sweep now, outside the schedule.
    pub async fn run_now(&self) -> MnemosResult<SweepResult> {
        sweep(&self.engine, self.turns.as_ref()).await
    }
}
