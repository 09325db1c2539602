//! Bounded tool-calling loop against the reasoning engine.
//!
//! Three independent bounds stop the loop and return best-effort text: a
//! ceiling on total tool executions, a wall-clock deadline checked before
//! every engine call, and a breaker for an identical consecutive request.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::truncate::truncate_for_storage;
use crate::error::MnemosResult;
use crate::traits::{Llm, LlmResponse, TokenUsage, ToolChoice, ToolExecutor, TurnStore, UsageSink};
use crate::types::{Message, MessageRole, NewTurn};

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The engine produced a final answer.
    Completed,
    MaxIterations,
    Deadline,
    /// The same tool request was issued twice in a row.
    NoProgress,
    /// The engine failed after producing some assistant text.
    EngineError,
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Final text, or the last assistant content in the transcript when the
    /// loop was cut short. May be empty.
    pub text: String,
    pub stop_reason: StopReason,
    pub tool_calls: usize,
    pub rounds: usize,
    pub usage: TokenUsage,
}

/// Last non-empty assistant content in the transcript.
pub fn best_effort_text(transcript: &[Message]) -> Option<String> {
    transcript
        .iter()
        .rev()
        .filter(|m| m.role == MessageRole::Assistant)
        .map(|m| m.content.trim())
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

pub struct ToolLoop {
    llm: Arc<dyn Llm>,
    tools: Arc<dyn ToolExecutor>,
    turns: Arc<dyn TurnStore>,
    usage_sink: Option<Arc<dyn UsageSink>>,
    max_tool_calls: usize,
    timeout: Duration,
}

impl ToolLoop {
    pub fn new(
        llm: Arc<dyn Llm>,
        tools: Arc<dyn ToolExecutor>,
        turns: Arc<dyn TurnStore>,
        max_tool_calls: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            tools,
            turns,
            usage_sink: None,
            max_tool_calls,
            timeout,
        }
    }

    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = Some(sink);
        self
    }

    /// Drive the engine until it answers or a bound trips.
    ///
    /// Tool outputs are persisted to `conversation_id` in truncated form; the
    /// engine sees them in full. Engine errors propagate only when the
    /// transcript holds no assistant text to fall back on.
    pub async fn run(
        &self,
        conversation_id: &str,
        mut transcript: Vec<Message>,
    ) -> MnemosResult<LoopOutcome> {
        let deadline = Instant::now() + self.timeout;
        let definitions = self.tools.definitions();
        let mut state = LoopState::default();

        loop {
            if Instant::now() >= deadline {
                warn!(conversation_id, rounds = state.rounds, "Tool loop deadline reached");
                return Ok(state.finish(&transcript, StopReason::Deadline));
            }

            state.rounds += 1;
            let response = match self
                .llm
                .generate_with_tools(&transcript, &definitions, ToolChoice::Auto, None)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    if best_effort_text(&transcript).is_some() {
                        warn!(
                            conversation_id,
                            error = %e,
                            "Engine failed mid-loop; returning best-effort text"
                        );
                        return Ok(state.finish(&transcript, StopReason::EngineError));
                    }
                    return Err(e);
                }
            };
            self.record_usage(conversation_id, &response, &mut state)
                .await;

            if !response.has_tool_calls() {
                transcript.push(Message::assistant(response.content_or_empty()));
                info!(
                    conversation_id,
                    rounds = state.rounds,
                    tool_calls = state.executed,
                    "Tool loop completed"
                );
                return Ok(state.finish(&transcript, StopReason::Completed));
            }

            let calls = response.tool_calls.clone();
            transcript.push(Message::assistant_tool_calls(
                response.content_or_empty(),
                calls.clone(),
            ));

            for call in calls {
                let signature = call.signature();
                if state.last_signature.as_deref() == Some(signature.as_str()) {
                    warn!(
                        conversation_id,
                        tool = %call.name,
                        "Identical tool request repeated; halting"
                    );
                    return Ok(state.finish(&transcript, StopReason::NoProgress));
                }
                if state.executed >= self.max_tool_calls {
                    warn!(
                        conversation_id,
                        limit = self.max_tool_calls,
                        "Tool call ceiling reached"
                    );
                    return Ok(state.finish(&transcript, StopReason::MaxIterations));
                }

                debug!(
                    conversation_id,
                    tool = %call.name,
                    iteration = state.executed + 1,
                    "Executing tool"
                );
                let output = self.tools.execute(&call.name, &call.arguments).await;
                state.executed += 1;
                state.last_signature = Some(signature);

                let stored = truncate_for_storage(&output, self.tools.truncation(&call.name));
                if let Err(e) = self
                    .turns
                    .append(NewTurn::tool(conversation_id, &call.name, &call.id, stored))
                    .await
                {
                    warn!(
                        conversation_id,
                        tool = %call.name,
                        error = %e,
                        "Failed to persist tool output"
                    );
                }

                transcript.push(Message::tool(&call.id, &call.name, output));
            }
        }
    }

    async fn record_usage(
        &self,
        conversation_id: &str,
        response: &LlmResponse,
        state: &mut LoopState,
    ) {
        let Some(usage) = response.usage else {
            return;
        };
        state.usage.prompt_tokens += usage.prompt_tokens;
        state.usage.completion_tokens += usage.completion_tokens;
        state.usage.total_tokens += usage.total_tokens;

        if let Some(sink) = &self.usage_sink {
            if let Err(e) = sink
                .record(conversation_id, self.llm.model_name(), usage)
                .await
            {
                warn!(conversation_id, error = %e, "Usage sink failed");
            }
        }
    }
}

#[derive(Default)]
struct LoopState {
    rounds: usize,
    executed: usize,
    last_signature: Option<String>,
    usage: TokenUsage,
}

impl LoopState {
    fn finish(self, transcript: &[Message], stop_reason: StopReason) -> LoopOutcome {
        LoopOutcome {
            text: best_effort_text(transcript).unwrap_or_default(),
            stop_reason,
            tool_calls: self.executed,
            rounds: self.rounds,
            usage: self.usage,
        }
    }
}
