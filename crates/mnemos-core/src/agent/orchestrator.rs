//! Per-turn orchestration: persist, retrieve, run the tool loop, reply,
//! then schedule compaction.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::config::AgentConfig;
use super::tool_loop::{LoopOutcome, StopReason, ToolLoop};
use crate::compaction::CompactionEngine;
use crate::error::MnemosResult;
use crate::gate::TurnHandler;
use crate::retrieval::{RetrievalOutcome, Retriever};
use crate::traits::{Llm, ToolExecutor, TurnStore, UsageSink};
use crate::types::{LogicalTurn, Message, NewTurn};

/// Sent when the loop ends without any assistant text.
pub const FALLBACK_REPLY: &str = "Sorry, I couldn't finish that just now. Could you try again?";

/// A finished reply handed to delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub conversation_id: String,
    /// Envelope of the turn being answered.
    pub in_reply_to: String,
    pub text: String,
    /// Memory could not be consulted for this turn.
    pub degraded: bool,
    pub stop_reason: StopReason,
}

/// Outbound delivery collaborator.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn deliver(&self, reply: AgentReply) -> MnemosResult<()>;
}

/// Top-level handler for logical turns.
pub struct AgentLoop {
    turns: Arc<dyn TurnStore>,
    retriever: Arc<Retriever>,
    tool_loop: ToolLoop,
    delivery: Arc<dyn ReplySink>,
    compaction: Option<Arc<CompactionEngine>>,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        llm: Arc<dyn Llm>,
        tools: Arc<dyn ToolExecutor>,
        turns: Arc<dyn TurnStore>,
        retriever: Arc<Retriever>,
        delivery: Arc<dyn ReplySink>,
        config: AgentConfig,
    ) -> Self {
        let tool_loop = ToolLoop::new(
            llm,
            tools,
            turns.clone(),
            config.max_tool_calls,
            config.timeout(),
        );
        Self {
            turns,
            retriever,
            tool_loop,
            delivery,
            compaction: None,
            config,
        }
    }

    pub fn with_compaction(mut self, engine: Arc<CompactionEngine>) -> Self {
        self.compaction = Some(engine);
        self
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.tool_loop = self.tool_loop.with_usage_sink(sink);
        self
    }

    fn system_prompt(&self, memory: &RetrievalOutcome) -> String {
        match memory.to_prompt_section() {
            Some(section) => format!("{}\n\n{}", self.config.system_prompt, section),
            None => self.config.system_prompt.clone(),
        }
    }

    /// Answer one logical turn and deliver the reply.
    pub async fn handle_turn(&self, turn: LogicalTurn) -> MnemosResult<AgentReply> {
        let conversation_id = turn.conversation_id.clone();

        let history = self
            .turns
            .recent(&conversation_id, self.config.history_turns)
            .await?;
        self.turns
            .append(NewTurn::user(&conversation_id, &turn.text).with_envelope(&turn.envelope_id))
            .await?;

        let memory = self.retriever.retrieve(&turn.text).await;

        let mut transcript = Vec::with_capacity(history.len() + 2);
        transcript.push(Message::system(self.system_prompt(&memory)));
        transcript.extend(history.iter().map(|t| t.to_message()));
        transcript.push(Message::user(&turn.text));

        let LoopOutcome {
            text,
            stop_reason,
            tool_calls,
            ..
        } = self.tool_loop.run(&conversation_id, transcript).await?;

        let text = if text.trim().is_empty() {
            FALLBACK_REPLY.to_string()
        } else {
            text
        };
        self.turns
            .append(NewTurn::assistant(&conversation_id, &text))
            .await?;

        info!(
            conversation_id = %conversation_id,
            ?stop_reason,
            tool_calls,
            degraded = memory.degraded,
            patterns = memory.patterns.len(),
            "Turn answered"
        );

        if let Some(engine) = &self.compaction {
            engine.schedule(conversation_id.clone());
        }

        let reply = AgentReply {
            conversation_id,
            in_reply_to: turn.envelope_id,
            text,
            degraded: memory.degraded,
            stop_reason,
        };
        if let Err(e) = self.delivery.deliver(reply.clone()).await {
            warn!(conversation_id = %reply.conversation_id, error = %e, "Delivery failed");
            return Err(e);
        }
        Ok(reply)
    }
}

#[async_trait]
impl TurnHandler for AgentLoop {
    async fn handle(&self, turn: LogicalTurn) -> MnemosResult<()> {
        self.handle_turn(turn).await.map(|_| ())
    }
}
