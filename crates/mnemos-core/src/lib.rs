//! mnemos-core - conversational memory and orchestration engine.
//!
//! Inbound events pass through the [`gate::EventGate`], which deduplicates,
//! reassembles and serializes them per conversation. Each logical turn is
//! answered by the [`agent::AgentLoop`], which consults the
//! [`retrieval::Retriever`] for remembered patterns and drives the reasoning
//! engine through a bounded tool loop. Conversation turns are later
//! consolidated into durable patterns by the [`compaction::CompactionEngine`].
//!
//! # Example
//!
//! ```ignore
//! use mnemos_core::{AgentLoop, EngineConfig, EventGate, InboundEvent, Retriever, SqliteStore};
//!
//! let config = EngineConfig::from_env()?;
//! let store = Arc::new(SqliteStore::new(&config.database_path)?);
//! let retriever = Arc::new(Retriever::new(store.clone(), embedder.clone(), config.retrieval.clone()));
//! let agent = AgentLoop::new(llm, tools, store.clone(), retriever, delivery, config.agent.clone());
//!
//! let gate = EventGate::new(config.gate.clone(), Arc::new(agent));
//! gate.process_event(InboundEvent::text("env-1", "chat-42", 1, "I started running again"));
//! ```

pub mod agent;
pub mod compaction;
pub mod config;
pub mod error;
pub mod gate;
pub mod patterns;
pub mod retrieval;
pub mod store;
pub mod tools;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use agent::{AgentConfig, AgentLoop, AgentReply, ReplySink, StopReason, ToolLoop};
pub use compaction::{
    CompactionConfig, CompactionEngine, CompactionOutcome, CompactionReport, CompactionScheduler,
};
pub use config::{EngineConfig, LlmProvider, LlmProviderConfig};
pub use error::{ErrorCode, MnemosError, MnemosResult};
pub use gate::{EventGate, GateConfig, TurnHandler};
pub use patterns::{PatternWriter, UpsertOutcome};
pub use retrieval::{RetrievalConfig, RetrievalOutcome, Retriever};
pub use store::SqliteStore;
pub use tools::{LogMeasurementTool, SearchMemoryTool, ToolError, ToolHandler, ToolRegistry};
pub use traits::{
    CallbackAcknowledger, CompactionNotifier, Embedder, EmbedderConfig, EmbeddingPurpose,
    ExclusiveLock, Llm, LlmConfig, LlmResponse, MeasurementLog, PatternStore, TokenUsage, Tool,
    ToolCall, ToolExecutor, TurnStore, UsageSink,
};
pub use types::{
    InboundEvent, LogicalTurn, Message, MessageRole, NewTurn, Pattern, PatternKind,
    PatternStatus, Turn, TurnRole,
};
