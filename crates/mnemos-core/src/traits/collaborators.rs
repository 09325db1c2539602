//! External collaborators the engine hands results to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::llm::TokenUsage;
use crate::error::MnemosResult;

/// Receives usage counters for cost accounting.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, conversation_id: &str, model: &str, usage: TokenUsage)
        -> MnemosResult<()>;
}

/// Receives the human-readable compaction summary.
#[async_trait]
pub trait CompactionNotifier: Send + Sync {
    async fn notify(&self, conversation_id: &str, summary: &str) -> MnemosResult<()>;
}

/// Acknowledges interactive callbacks so the origin UI does not hang.
#[async_trait]
pub trait CallbackAcknowledger: Send + Sync {
    async fn acknowledge(&self, callback_id: &str) -> MnemosResult<()>;
}

/// A body measurement recorded by the `log_measurement` tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub kind: String,
    pub value: f64,
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
}

/// Storage for logged measurements.
#[async_trait]
pub trait MeasurementLog: Send + Sync {
    /// Store a measurement and return its record id.
    async fn record_measurement(&self, measurement: Measurement) -> MnemosResult<i64>;

    async fn recent_measurements(&self, kind: &str, limit: usize)
        -> MnemosResult<Vec<Measurement>>;
}
