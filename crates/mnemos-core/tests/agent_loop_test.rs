mod common;

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{tool_response, MockLlm, RecordingDelivery, Scripted, TopicEmbedder};
use mnemos_core::agent::FALLBACK_REPLY;
use mnemos_core::error::{MnemosError, MnemosResult};
use mnemos_core::retrieval::DEGRADED_NOTICE;
use mnemos_core::traits::{
    Embedder, EmbeddingPurpose, LlmResponse, Tool, ToolCall, TruncationPolicy, TurnStore,
};
use mnemos_core::types::{EventKind, InboundEvent, LogicalTurn, Message, TurnRole};
use mnemos_core::{
    AgentConfig, AgentLoop, EventGate, GateConfig, RetrievalConfig, Retriever, SqliteStore,
    StopReason, ToolError, ToolHandler, ToolLoop, ToolRegistry,
};

/// Returns fifty numbered rows and counts executions.
#[derive(Default)]
struct RowsTool {
    executions: AtomicUsize,
}

#[async_trait]
impl ToolHandler for RowsTool {
    fn name(&self) -> &str {
        "list_rows"
    }

    fn definition(&self) -> Tool {
        Tool::new(
            "list_rows",
            "List numbered rows",
            json!({"type": "object", "properties": {"page": {"type": "integer"}}}),
        )
    }

    fn truncation(&self) -> TruncationPolicy {
        TruncationPolicy::Lines(3)
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let page = arguments
            .get("page")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| ToolError::invalid("page is required"))?;
        Ok((1..=50)
            .map(|i| format!("page {} row {}", page, i))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _: &str, _: Option<EmbeddingPurpose>) -> MnemosResult<Vec<f32>> {
        Err(MnemosError::embedding("connection refused"))
    }
    fn dimension(&self) -> usize {
        4
    }
    fn model_name(&self) -> &str {
        "failing"
    }
}

fn rows_call(id: &str, page: i64) -> ToolCall {
    ToolCall::new(id, "list_rows", json!({"page": page}))
}

fn registry(tool: Arc<RowsTool>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(tool).unwrap();
    Arc::new(registry)
}

fn tool_loop(llm: &MockLlm, tool: Arc<RowsTool>, store: Arc<SqliteStore>, max: usize) -> ToolLoop {
    ToolLoop::new(
        Arc::new(llm.clone()),
        registry(tool),
        store,
        max,
        Duration::from_secs(120),
    )
}

fn opening() -> Vec<Message> {
    vec![Message::system("be brief"), Message::user("show me the rows")]
}

#[tokio::test]
async fn test_identical_consecutive_request_runs_once() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let tool = Arc::new(RowsTool::default());
    let llm = MockLlm::replying(vec![
        tool_response("Let me look that up.", vec![rows_call("call_1", 1)]),
        tool_response("", vec![rows_call("call_2", 1)]),
    ]);

    let outcome = tool_loop(&llm, tool.clone(), store, 8)
        .run("c1", opening())
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::NoProgress);
    assert_eq!(tool.executions.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.tool_calls, 1);
    assert_eq!(outcome.text, "Let me look that up.");
}

#[tokio::test]
async fn test_ceiling_stops_before_executing_past_limit() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let tool = Arc::new(RowsTool::default());
    let llm = MockLlm::replying(vec![
        tool_response("page one", vec![rows_call("a", 1)]),
        tool_response("page two", vec![rows_call("b", 2)]),
        tool_response("page three", vec![rows_call("c", 3)]),
    ]);

    let outcome = tool_loop(&llm, tool.clone(), store, 2)
        .run("c1", opening())
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::MaxIterations);
    assert_eq!(tool.executions.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.text, "page three");
    assert_eq!(outcome.usage.prompt_tokens, 30);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_checked_before_next_engine_call() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let tool = Arc::new(RowsTool::default());
    let llm = MockLlm::new(vec![
        Scripted::Delayed(
            Duration::from_secs(150),
            tool_response("Still working on it.", vec![rows_call("a", 1)]),
        ),
        Scripted::Reply(LlmResponse::text("never reached")),
    ]);

    let outcome = tool_loop(&llm, tool.clone(), store, 8)
        .run("c1", opening())
        .await
        .unwrap();

    assert_eq!(outcome.stop_reason, StopReason::Deadline);
    assert_eq!(llm.call_count(), 1);
    assert_eq!(tool.executions.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.text, "Still working on it.");
}

#[tokio::test]
async fn test_engine_error_propagates_without_fallback_text() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let llm = MockLlm::new(vec![Scripted::Fail("rate limited".to_string())]);

    let result = tool_loop(&llm, Arc::new(RowsTool::default()), store, 8)
        .run("c1", opening())
        .await;
    assert!(matches!(result, Err(MnemosError::Llm { .. })));
}

#[tokio::test]
async fn test_engine_error_after_text_returns_best_effort() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let llm = MockLlm::new(vec![
        Scripted::Reply(tool_response("Here is what I have so far.", vec![rows_call("a", 1)])),
        Scripted::Fail("rate limited".to_string()),
    ]);

    let outcome = tool_loop(&llm, Arc::new(RowsTool::default()), store, 8)
        .run("c1", opening())
        .await
        .unwrap();
    assert_eq!(outcome.stop_reason, StopReason::EngineError);
    assert_eq!(outcome.text, "Here is what I have so far.");
}

#[tokio::test]
async fn test_tool_output_is_full_in_transcript_and_truncated_in_store() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let llm = MockLlm::replying(vec![
        tool_response("", vec![rows_call("call_1", 4)]),
        LlmResponse::text("There are fifty rows."),
    ]);

    let outcome = tool_loop(&llm, Arc::new(RowsTool::default()), store.clone(), 8)
        .run("c1", opening())
        .await
        .unwrap();
    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.rounds, 2);

    let second_call = llm.transcript(1);
    let tool_message = second_call.last().unwrap();
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
    assert_eq!(tool_message.content.lines().count(), 50);

    let stored = store.recent("c1", 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, TurnRole::Tool);
    assert_eq!(
        stored[0].content,
        "page 4 row 1\npage 4 row 2\npage 4 row 3\n[... 47 more lines]"
    );
}

fn turn(envelope: &str, text: &str) -> LogicalTurn {
    LogicalTurn {
        conversation_id: "c1".to_string(),
        envelope_id: envelope.to_string(),
        message_id: Some(1),
        text: text.to_string(),
        kind: EventKind::Message,
        parts: 1,
    }
}

fn agent(
    llm: &MockLlm,
    store: Arc<SqliteStore>,
    embedder: Arc<dyn Embedder>,
    delivery: RecordingDelivery,
) -> AgentLoop {
    let retriever = Arc::new(Retriever::new(
        store.clone(),
        embedder,
        RetrievalConfig::default(),
    ));
    AgentLoop::new(
        Arc::new(llm.clone()),
        registry(Arc::new(RowsTool::default())),
        store,
        retriever,
        Arc::new(delivery),
        AgentConfig::default(),
    )
}

#[tokio::test]
async fn test_turn_is_persisted_answered_and_delivered() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let delivery = RecordingDelivery::default();
    let llm = MockLlm::replying(vec![
        tool_response("", vec![rows_call("call_1", 1)]),
        LlmResponse::text("Fifty rows on page one."),
        LlmResponse::text("You asked about rows."),
    ]);
    let agent = agent(&llm, store.clone(), Arc::new(TopicEmbedder), delivery.clone());

    let reply = agent
        .handle_turn(turn("env-1", "how many rows are on the first page?"))
        .await
        .unwrap();
    assert_eq!(reply.text, "Fifty rows on page one.");
    assert_eq!(reply.in_reply_to, "env-1");
    assert!(!reply.degraded);
    assert_eq!(reply.stop_reason, StopReason::Completed);

    let roles: Vec<TurnRole> = store
        .recent("c1", 10)
        .await
        .unwrap()
        .iter()
        .map(|t| t.role)
        .collect();
    assert_eq!(roles, vec![TurnRole::User, TurnRole::Tool, TurnRole::Assistant]);
    assert_eq!(
        store.recent("c1", 10).await.unwrap()[0].envelope_id.as_deref(),
        Some("env-1")
    );

    // The next turn replays history and carries the system prompt first.
    agent
        .handle_turn(turn("env-2", "what did I ask you before?"))
        .await
        .unwrap();
    let transcript = llm.transcript(2);
    assert!(transcript[0]
        .content
        .starts_with(&AgentConfig::default().system_prompt));
    assert!(transcript
        .iter()
        .any(|m| m.content == "Fifty rows on page one."));
    assert_eq!(
        transcript.last().unwrap().content,
        "what did I ask you before?"
    );

    let delivered = delivery.replies.lock().unwrap().clone();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[1].text, "You asked about rows.");
}

#[tokio::test]
async fn test_memory_failure_marks_reply_degraded() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let delivery = RecordingDelivery::default();
    let llm = MockLlm::replying(vec![LlmResponse::text("I can still help with that.")]);
    let agent = agent(&llm, store, Arc::new(FailingEmbedder), delivery.clone());

    let reply = agent
        .handle_turn(turn("env-1", "what tea do I usually drink in the evening?"))
        .await
        .unwrap();
    assert!(reply.degraded);
    assert_eq!(reply.text, "I can still help with that.");
    assert!(llm.transcript(0)[0].content.contains(DEGRADED_NOTICE));
    assert!(delivery.replies.lock().unwrap()[0].degraded);
}

#[tokio::test]
async fn test_empty_answer_falls_back() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let delivery = RecordingDelivery::default();
    let llm = MockLlm::replying(vec![LlmResponse::text("   ")]);
    let agent = agent(&llm, store.clone(), Arc::new(TopicEmbedder), delivery.clone());

    let reply = agent.handle_turn(turn("env-1", "hello there friend")).await.unwrap();
    assert_eq!(reply.text, FALLBACK_REPLY);

    let stored = store.recent("c1", 1).await.unwrap();
    assert_eq!(stored[0].content, FALLBACK_REPLY);
}

#[tokio::test]
async fn test_gate_routes_events_to_agent() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let delivery = RecordingDelivery::default();
    let llm = MockLlm::replying(vec![
        LlmResponse::text("first"),
        LlmResponse::text("second"),
    ]);
    let agent = Arc::new(agent(&llm, store, Arc::new(TopicEmbedder), delivery.clone()));
    let gate = EventGate::new(GateConfig::default(), agent);

    gate.process_event(InboundEvent::text("env-1", "c1", 1, "good morning, how are you?"));
    gate.process_event(InboundEvent::text("env-1", "c1", 1, "good morning, how are you?"));
    gate.process_event(InboundEvent::text("env-2", "c1", 2, "tell me something nice"));

    for _ in 0..100 {
        if delivery.replies.lock().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let texts: Vec<String> = delivery
        .replies
        .lock()
        .unwrap()
        .iter()
        .map(|r| r.text.clone())
        .collect();
    assert_eq!(texts, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(llm.call_count(), 2);
}
