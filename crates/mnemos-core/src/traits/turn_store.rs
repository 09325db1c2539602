//! Turn log trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::MnemosResult;
use crate::types::{NewTurn, Turn};

/// Append-only conversation turn log with a per-turn compaction marker.
#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn append(&self, turn: NewTurn) -> MnemosResult<Turn>;

    /// Turns with the given ids, in id order. Unknown ids are skipped.
    async fn get_turns(&self, ids: &[i64]) -> MnemosResult<Vec<Turn>>;

    /// Turns not yet absorbed into a compaction pass, oldest first.
    async fn uncompacted(&self, conversation_id: &str) -> MnemosResult<Vec<Turn>>;

    /// Set the compaction marker on turns that do not have one yet.
    /// Returns how many turns were marked.
    async fn mark_compacted(&self, ids: &[i64], at: DateTime<Utc>) -> MnemosResult<usize>;

    /// Latest `limit` turns, returned oldest first.
    async fn recent(&self, conversation_id: &str, limit: usize) -> MnemosResult<Vec<Turn>>;

    async fn last_compaction_at(&self, conversation_id: &str)
        -> MnemosResult<Option<DateTime<Utc>>>;

    async fn set_last_compaction(&self, conversation_id: &str, at: DateTime<Utc>)
        -> MnemosResult<()>;

    /// Conversations that still have uncompacted turns.
    async fn conversations_with_pending(&self) -> MnemosResult<Vec<String>>;
}
