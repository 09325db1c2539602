//! Hand-written collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use mnemos_core::error::{MnemosError, MnemosResult};
use mnemos_core::traits::{
    Embedder, EmbeddingPurpose, GenerationOptions, Llm, LlmResponse, TokenUsage, Tool, ToolCall,
    ToolChoice,
};
use mnemos_core::types::{LogicalTurn, Message};
use mnemos_core::{AgentReply, ReplySink, TurnHandler};

/// One scripted engine reply.
pub enum Scripted {
    Reply(LlmResponse),
    Fail(String),
    /// Sleep (on the tokio clock) before replying.
    Delayed(Duration, LlmResponse),
}

/// Reasoning engine that replays scripted responses in order and records
/// every transcript it was sent. Once the script runs out it repeats the
/// last reply.
#[derive(Clone)]
pub struct MockLlm {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    last: Arc<Mutex<Option<LlmResponse>>>,
    pub calls: Arc<AtomicUsize>,
    pub transcripts: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockLlm {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            last: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
            transcripts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn replying(responses: Vec<LlmResponse>) -> Self {
        Self::new(responses.into_iter().map(Scripted::Reply).collect())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn transcript(&self, index: usize) -> Vec<Message> {
        self.transcripts.lock().unwrap()[index].clone()
    }

    async fn next(&self, messages: &[Message]) -> MnemosResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcripts.lock().unwrap().push(messages.to_vec());

        let step = self.script.lock().unwrap().pop_front();
        let response = match step {
            Some(Scripted::Reply(response)) => response,
            Some(Scripted::Fail(message)) => return Err(MnemosError::llm(message)),
            Some(Scripted::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                response
            }
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| LlmResponse::text("")),
        };
        *self.last.lock().unwrap() = Some(response.clone());
        Ok(response)
    }
}

#[async_trait]
impl Llm for MockLlm {
    async fn generate(
        &self,
        messages: &[Message],
        _options: Option<GenerationOptions>,
    ) -> MnemosResult<LlmResponse> {
        self.next(messages).await
    }

    async fn generate_with_tools(
        &self,
        messages: &[Message],
        _tools: &[Tool],
        _tool_choice: ToolChoice,
        _options: Option<GenerationOptions>,
    ) -> MnemosResult<LlmResponse> {
        self.next(messages).await
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

pub fn tool_response(content: &str, calls: Vec<ToolCall>) -> LlmResponse {
    LlmResponse {
        content: (!content.is_empty()).then(|| content.to_string()),
        tool_calls: calls,
        usage: Some(TokenUsage::new(10, 5)),
    }
}

/// Embeds onto fixed topic axes so similarity is predictable.
pub struct TopicEmbedder;

#[async_trait]
impl Embedder for TopicEmbedder {
    async fn embed(&self, text: &str, _: Option<EmbeddingPurpose>) -> MnemosResult<Vec<f32>> {
        let text = text.to_lowercase();
        let axis = |words: &[&str]| {
            if words.iter().any(|w| text.contains(w)) {
                1.0
            } else {
                0.0
            }
        };
        Ok(vec![
            axis(&["weigh", "kg"]),
            axis(&["tea", "coffee"]),
            axis(&["run", "marathon"]),
            0.05,
        ])
    }

    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "topic"
    }
}

/// Handler that forwards turns to a channel.
pub struct ChannelHandler(pub mpsc::UnboundedSender<LogicalTurn>);

#[async_trait]
impl TurnHandler for ChannelHandler {
    async fn handle(&self, turn: LogicalTurn) -> MnemosResult<()> {
        let _ = self.0.send(turn);
        Ok(())
    }
}

/// Delivery collaborator that records replies.
#[derive(Default, Clone)]
pub struct RecordingDelivery {
    pub replies: Arc<Mutex<Vec<AgentReply>>>,
}

#[async_trait]
impl ReplySink for RecordingDelivery {
    async fn deliver(&self, reply: AgentReply) -> MnemosResult<()> {
        self.replies.lock().unwrap().push(reply);
        Ok(())
    }
}
