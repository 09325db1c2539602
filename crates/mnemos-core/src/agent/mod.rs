//! Agent loop: drives the reasoning engine and tools for each logical turn.

mod config;
mod orchestrator;
mod tool_loop;
mod truncate;

pub use config::AgentConfig;
pub use orchestrator::{AgentLoop, AgentReply, ReplySink, FALLBACK_REPLY};
pub use tool_loop::{best_effort_text, LoopOutcome, StopReason, ToolLoop};
pub use truncate::truncate_for_storage;
