//! Configuration for the agent tool loop.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Iteration and time bounds for one agent turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Ceiling on tool executions across one loop. Default: 8
    pub max_tool_calls: usize,
    /// Wall-clock budget from loop start. Default: 120s
    pub timeout_secs: u64,
    /// Prior turns replayed into the prompt. Default: 30
    pub history_turns: usize,
    /// Prepended to every system prompt.
    pub system_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 8,
            timeout_secs: 120,
            history_turns: 30,
            system_prompt: "You are a helpful personal assistant with long-term memory. \
                Use the remembered patterns when they are relevant and the tools when you \
                need to look something up or record a measurement."
                .to_string(),
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be at least 1");
        }
        Ok(())
    }
}
