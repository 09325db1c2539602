mod common;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use common::ChannelHandler;
use mnemos_core::error::{MnemosError, MnemosResult};
use mnemos_core::types::{InboundEvent, LogicalTurn};
use mnemos_core::{EventGate, GateConfig, TurnHandler};

fn channel_gate() -> (Arc<EventGate>, mpsc::UnboundedReceiver<LogicalTurn>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventGate::new(GateConfig::default(), Arc::new(ChannelHandler(tx))),
        rx,
    )
}

fn drain(rx: &mut mpsc::UnboundedReceiver<LogicalTurn>) -> Vec<LogicalTurn> {
    let mut turns = Vec::new();
    while let Ok(turn) = rx.try_recv() {
        turns.push(turn);
    }
    turns
}

#[tokio::test(start_paused = true)]
async fn test_two_long_fragments_become_one_turn() {
    let (gate, mut rx) = channel_gate();
    let part1 = format!("{}-part1", "X".repeat(4000));
    let part2 = format!("{}-part2", "X".repeat(4000));

    gate.process_event(InboundEvent::text("env-1", "chat", 100, part1.clone()));
    tokio::time::sleep(Duration::from_millis(500)).await;
    gate.process_event(InboundEvent::text("env-2", "chat", 101, part2.clone()));
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let turns = drain(&mut rx);
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].text, format!("{}\n{}", part1, part2));
    assert_eq!(turns[0].envelope_id, "env-1");
    assert_eq!(turns[0].message_id, Some(100));
    assert_eq!(turns[0].parts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_fragment_window_expiry_splits_turns() {
    let (gate, mut rx) = channel_gate();
    let long = "Y".repeat(4200);

    gate.process_event(InboundEvent::text("env-1", "chat", 1, long.clone()));
    tokio::time::sleep(Duration::from_millis(1100)).await;
    gate.process_event(InboundEvent::text("env-2", "chat", 2, long.clone()));
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let turns = drain(&mut rx);
    assert_eq!(turns.len(), 2);
    assert!(turns.iter().all(|t| t.parts == 1));
}

#[tokio::test(start_paused = true)]
async fn test_same_envelope_is_handled_once() {
    let (gate, mut rx) = channel_gate();
    gate.process_event(InboundEvent::text("env-1", "chat", 1, "hello"));
    gate.process_event(InboundEvent::text("env-1", "chat", 1, "hello"));
    // Same conversation-scoped message id under a new envelope.
    gate.process_event(InboundEvent::text("env-2", "chat", 1, "hello"));
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(drain(&mut rx).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_oldest_identity_evicted_past_capacity() {
    let (gate, mut rx) = channel_gate();
    for i in 0..=2000i64 {
        gate.process_event(InboundEvent::text(format!("env-{}", i), "chat", i, "hi"));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(drain(&mut rx).len(), 2001);

    gate.process_event(InboundEvent::text("env-0", "chat", 0, "hi"));
    gate.process_event(InboundEvent::text("env-2000", "chat", 2000, "hi"));
    tokio::time::sleep(Duration::from_millis(10)).await;

    let replayed = drain(&mut rx);
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].envelope_id, "env-0");
}

/// Records start/end markers and sleeps in between.
struct SlowHandler {
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TurnHandler for SlowHandler {
    async fn handle(&self, turn: LogicalTurn) -> MnemosResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("start {}", turn.text));
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.log.lock().unwrap().push(format!("end {}", turn.text));
        if turn.text == "boom" {
            return Err(MnemosError::llm("handler failed"));
        }
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_per_conversation_fifo_survives_handler_errors() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = EventGate::new(
        GateConfig::default(),
        Arc::new(SlowHandler { log: log.clone() }),
    );

    gate.process_event(InboundEvent::text("e1", "a", 1, "a1"));
    gate.process_event(InboundEvent::text("e2", "a", 2, "boom"));
    gate.process_event(InboundEvent::text("e3", "a", 3, "a3"));
    gate.process_event(InboundEvent::text("e4", "b", 1, "b1"));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let log = log.lock().unwrap().clone();
    let conversation_a: Vec<&String> = log.iter().filter(|l| !l.ends_with("b1")).collect();
    assert_eq!(
        conversation_a,
        vec!["start a1", "end a1", "start boom", "end boom", "start a3", "end a3"]
    );

    // Conversation b ran alongside a rather than after it.
    let b_start = log.iter().position(|l| l == "start b1").unwrap();
    let a_end = log.iter().position(|l| l == "end a1").unwrap();
    assert!(b_start < a_end);
}
