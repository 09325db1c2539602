//! Tool executor contract.

use async_trait::async_trait;

use super::llm::Tool;

/// How a tool's output is shortened before it is persisted as a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationPolicy {
    /// Short deterministic confirmations; stored verbatim.
    Unbounded,
    /// Keep at most this many lines.
    Lines(usize),
    /// Keep at most this many characters.
    Chars(usize),
}

impl Default for TruncationPolicy {
    fn default() -> Self {
        TruncationPolicy::Chars(2000)
    }
}

/// Dispatch table over named side-effecting capabilities.
///
/// `execute` never fails: unknown names and handler errors come back as
/// text beginning with `Error:` so the reasoning engine can recover.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<Tool>;

    async fn execute(&self, name: &str, arguments: &serde_json::Value) -> String;

    fn truncation(&self, name: &str) -> TruncationPolicy;
}
