//! Mutual-exclusion primitive.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::MnemosResult;

/// A process-external lock with non-blocking acquire.
#[async_trait]
pub trait ExclusiveLock: Send + Sync {
    /// Try to take `key` for `holder`. Returns `false` if someone else holds
    /// it. A hold older than `stale_after` is treated as abandoned.
    async fn try_acquire(&self, key: &str, holder: &str, stale_after: Duration)
        -> MnemosResult<bool>;

    /// Release `key` if `holder` owns it.
    async fn release(&self, key: &str, holder: &str) -> MnemosResult<()>;
}
