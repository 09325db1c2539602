//! Dedup and ordering gate for inbound events.
//!
//! [`EventGate::process_event`] drops duplicates, reassembles fragmented
//! text and media groups, and pushes each resulting [`LogicalTurn`] onto a
//! per-conversation FIFO queue that runs the registered [`TurnHandler`].

mod buffers;
mod config;
mod dedup;
mod queue;

pub use buffers::{FragmentBuffer, MediaGroupBuffer, PART_SEPARATOR};
pub use config::GateConfig;
pub use dedup::DedupCache;
pub use queue::{ConversationQueue, QueuedTask};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::MnemosResult;
use crate::traits::CallbackAcknowledger;
use crate::types::{EventKind, InboundEvent, LogicalTurn};

/// Consumer of logical turns, run one at a time per conversation.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn handle(&self, turn: LogicalTurn) -> MnemosResult<()>;
}

#[derive(Default)]
struct Buffers {
    fragments: HashMap<String, FragmentBuffer>,
    /// Keyed by media group id.
    media: HashMap<String, MediaGroupBuffer>,
    next_generation: u64,
}

impl Buffers {
    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct EventGate {
    config: GateConfig,
    handler: Arc<dyn TurnHandler>,
    acknowledger: Option<Arc<dyn CallbackAcknowledger>>,
    dedup: Mutex<DedupCache>,
    buffers: Mutex<Buffers>,
    queue: ConversationQueue,
}

impl EventGate {
    pub fn new(config: GateConfig, handler: Arc<dyn TurnHandler>) -> Arc<Self> {
        Self::build(config, handler, None)
    }

    /// A gate that acknowledges every callback event, duplicates included.
    pub fn with_acknowledger(
        config: GateConfig,
        handler: Arc<dyn TurnHandler>,
        acknowledger: Arc<dyn CallbackAcknowledger>,
    ) -> Arc<Self> {
        Self::build(config, handler, Some(acknowledger))
    }

    fn build(
        config: GateConfig,
        handler: Arc<dyn TurnHandler>,
        acknowledger: Option<Arc<dyn CallbackAcknowledger>>,
    ) -> Arc<Self> {
        let dedup = DedupCache::new(config.dedup_ttl(), config.dedup_capacity);
        Arc::new(Self {
            config,
            handler,
            acknowledger,
            dedup: Mutex::new(dedup),
            buffers: Mutex::new(Buffers::default()),
            queue: ConversationQueue::new(),
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Accept one inbound event. Returns immediately; handling happens on
    /// the conversation's queue. Must be called within a tokio runtime.
    pub fn process_event(self: &Arc<Self>, event: InboundEvent) {
        if event.kind == EventKind::Callback {
            self.acknowledge(&event);
        }

        let duplicate = lock(&self.dedup).check_and_record(&event, Instant::now());
        if duplicate {
            debug!(
                conversation_id = %event.conversation_id,
                envelope_id = %event.envelope_id,
                "Dropping duplicate event"
            );
            return;
        }

        if let Some(group_id) = event.media_group_id.clone() {
            self.buffer_media(event, group_id);
        } else if event.kind == EventKind::Callback {
            self.emit(LogicalTurn::from_event(&event));
        } else {
            self.handle_text(event);
        }
    }

    /// Emit every buffered fragment and media group now.
    pub fn flush_pending(&self) {
        let mut buffers = lock(&self.buffers);
        let fragments: Vec<_> = buffers.fragments.drain().map(|(_, b)| b).collect();
        let media: Vec<_> = buffers.media.drain().map(|(_, b)| b).collect();
        for buffer in fragments {
            self.emit(buffer.into_turn());
        }
        for buffer in media {
            self.emit(buffer.into_turn(&self.config.media_placeholder));
        }
    }

    /// Forget every seen identity and drop buffered input without emitting it.
    pub fn reset(&self) {
        lock(&self.dedup).clear();
        let mut buffers = lock(&self.buffers);
        buffers.fragments.clear();
        buffers.media.clear();
    }

    /// Buffered fragment and media-group accumulators not yet flushed.
    pub fn pending_buffers(&self) -> usize {
        let buffers = lock(&self.buffers);
        buffers.fragments.len() + buffers.media.len()
    }

    /// Conversations whose queue still has work running or waiting.
    pub fn in_flight(&self) -> usize {
        self.queue.active_keys()
    }

    fn acknowledge(&self, event: &InboundEvent) {
        let (Some(acknowledger), Some(callback_id)) =
            (self.acknowledger.clone(), event.callback_id.clone())
        else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = acknowledger.acknowledge(&callback_id).await {
                warn!(callback_id = %callback_id, error = %e, "Failed to acknowledge callback");
            }
        });
    }

    fn handle_text(self: &Arc<Self>, event: InboundEvent) {
        let conversation_id = event.conversation_id.clone();
        let len = event.text_len();
        let long = len >= self.config.fragment_min_chars;

        let mut buffers = lock(&self.buffers);
        let existing = buffers.fragments.remove(&conversation_id);

        match existing {
            Some(buffer) if buffer.is_contiguous(&event) => {
                if buffer.would_exceed(len, self.config.fragment_max_chars) {
                    debug!(conversation_id = %conversation_id, "Fragment cap reached; flushing");
                    self.emit(buffer.into_turn());
                    if long {
                        self.start_fragment(&mut buffers, &event);
                    } else {
                        self.emit(LogicalTurn::from_event(&event));
                    }
                    return;
                }

                let mut buffer = buffer;
                let generation = buffers.generation();
                buffer.push(&event, generation);
                if long {
                    debug!(
                        conversation_id = %conversation_id,
                        fragments = buffer.len(),
                        "Extending fragment buffer"
                    );
                    buffers.fragments.insert(conversation_id.clone(), buffer);
                    self.arm_fragment_timer(conversation_id, generation);
                } else {
                    // A short contiguous piece is the tail of the message.
                    self.emit(buffer.into_turn());
                }
            }
            other => {
                if let Some(stale) = other {
                    self.emit(stale.into_turn());
                }
                if long {
                    self.start_fragment(&mut buffers, &event);
                } else {
                    self.emit(LogicalTurn::from_event(&event));
                }
            }
        }
    }

    fn start_fragment(self: &Arc<Self>, buffers: &mut Buffers, event: &InboundEvent) {
        let generation = buffers.generation();
        buffers.fragments.insert(
            event.conversation_id.clone(),
            FragmentBuffer::start(event, generation),
        );
        debug!(conversation_id = %event.conversation_id, "Started fragment buffer");
        self.arm_fragment_timer(event.conversation_id.clone(), generation);
    }

    fn arm_fragment_timer(self: &Arc<Self>, conversation_id: String, generation: u64) {
        let gate = Arc::clone(self);
        let window = self.config.fragment_window();
        self.spawn_after(window, move || {
            let mut buffers = lock(&gate.buffers);
            let current = buffers
                .fragments
                .get(&conversation_id)
                .is_some_and(|b| b.generation == generation);
            if current {
                if let Some(buffer) = buffers.fragments.remove(&conversation_id) {
                    gate.emit(buffer.into_turn());
                }
            }
        });
    }

    fn buffer_media(self: &Arc<Self>, event: InboundEvent, group_id: String) {
        let mut buffers = lock(&self.buffers);

        // Text fragments that arrived first keep their place in the queue.
        if let Some(pending) = buffers.fragments.remove(&event.conversation_id) {
            self.emit(pending.into_turn());
        }

        let generation = buffers.generation();
        match buffers.media.get_mut(&group_id) {
            Some(buffer) => buffer.push(&event, generation),
            None => {
                buffers
                    .media
                    .insert(group_id.clone(), MediaGroupBuffer::start(&event, generation));
            }
        }
        drop(buffers);

        let gate = Arc::clone(self);
        let placeholder = self.config.media_placeholder.clone();
        self.spawn_after(self.config.media_group_delay(), move || {
            let mut buffers = lock(&gate.buffers);
            let current = buffers
                .media
                .get(&group_id)
                .is_some_and(|b| b.generation == generation);
            if current {
                if let Some(buffer) = buffers.media.remove(&group_id) {
                    debug!(
                        conversation_id = %buffer.conversation_id(),
                        media_group_id = %group_id,
                        "Flushing media group"
                    );
                    gate.emit(buffer.into_turn(&placeholder));
                }
            }
        });
    }

    fn spawn_after<F>(&self, delay: Duration, flush: F)
    where
        F: FnOnce() + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            flush();
        });
    }

    fn emit(&self, turn: LogicalTurn) {
        let handler = Arc::clone(&self.handler);
        let key = turn.conversation_id.clone();
        debug!(conversation_id = %key, parts = turn.parts, "Queueing logical turn");
        self.queue
            .enqueue(&key, Box::pin(async move { handler.handle(turn).await }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    struct ChannelHandler(mpsc::UnboundedSender<LogicalTurn>);

    #[async_trait]
    impl TurnHandler for ChannelHandler {
        async fn handle(&self, turn: LogicalTurn) -> MnemosResult<()> {
            let _ = self.0.send(turn);
            Ok(())
        }
    }

    fn gate() -> (Arc<EventGate>, mpsc::UnboundedReceiver<LogicalTurn>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            EventGate::new(GateConfig::default(), Arc::new(ChannelHandler(tx))),
            rx,
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_text_passes_straight_through() {
        let (gate, mut rx) = gate();
        gate.process_event(InboundEvent::text("e1", "c1", 1, "hello"));
        let turn = rx.recv().await.unwrap();
        assert_eq!(turn.text, "hello");
        assert_eq!(turn.parts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_contiguous_tail_flushes_buffer() {
        let (gate, mut rx) = gate();
        let long = "a".repeat(4000);
        gate.process_event(InboundEvent::text("e1", "c1", 1, long.clone()));
        gate.process_event(InboundEvent::text("e2", "c1", 2, "end"));

        let turn = rx.recv().await.unwrap();
        assert_eq!(turn.text, format!("{}\nend", long));
        assert_eq!(gate.pending_buffers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_contiguous_flushes_existing_first() {
        let (gate, mut rx) = gate();
        let long = "b".repeat(4000);
        gate.process_event(InboundEvent::text("e1", "c1", 1, long.clone()));
        gate.process_event(InboundEvent::text("e2", "c1", 7, "unrelated"));

        assert_eq!(rx.recv().await.unwrap().text, long);
        assert_eq!(rx.recv().await.unwrap().text, "unrelated");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_starts_fresh_buffer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = GateConfig {
            fragment_min_chars: 10,
            fragment_max_chars: 25,
            ..Default::default()
        };
        let gate = EventGate::new(config, Arc::new(ChannelHandler(tx)));
        gate.process_event(InboundEvent::text("e1", "c1", 1, "x".repeat(12)));
        gate.process_event(InboundEvent::text("e2", "c1", 2, "y".repeat(12)));
        gate.process_event(InboundEvent::text("e3", "c1", 3, "z".repeat(12)));
        settle().await;

        assert_eq!(
            rx.recv().await.unwrap().text,
            format!("{}\n{}", "x".repeat(12), "y".repeat(12))
        );
        assert_eq!(rx.recv().await.unwrap().text, "z".repeat(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_group_flushes_after_quiet_period() {
        let (gate, mut rx) = gate();
        for (id, caption) in [(1, "first"), (2, ""), (3, "third")] {
            let env = format!("e{}", id);
            gate.process_event(InboundEvent::text(env, "c1", id, caption).in_media_group("g1"));
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        assert!(rx.try_recv().is_err());

        settle().await;
        let turn = rx.recv().await.unwrap();
        assert_eq!(turn.text, "first\nthird");
        assert_eq!(turn.parts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_pending_and_reset() {
        let (gate, mut rx) = gate();
        gate.process_event(InboundEvent::text("e1", "c1", 1, "").in_media_group("g1"));
        gate.flush_pending();
        assert_eq!(rx.recv().await.unwrap().text, "[media]");

        gate.process_event(InboundEvent::text("e2", "c1", 2, "c".repeat(5000)));
        gate.reset();
        settle().await;
        assert!(rx.try_recv().is_err());

        // Identities are forgotten after reset.
        gate.process_event(InboundEvent::text("e2", "c1", 2, "again"));
        assert_eq!(rx.recv().await.unwrap().text, "again");
        settle().await;
        assert_eq!(gate.in_flight(), 0);
    }

    struct RecordingAck(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl CallbackAcknowledger for RecordingAck {
        async fn acknowledge(&self, callback_id: &str) -> MnemosResult<()> {
            let _ = self.0.send(callback_id.to_string());
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_callback_still_acknowledged() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let gate = EventGate::with_acknowledger(
            GateConfig::default(),
            Arc::new(ChannelHandler(tx)),
            Arc::new(RecordingAck(ack_tx)),
        );

        gate.process_event(InboundEvent::callback("e1", "c1", "cb1", "yes"));
        gate.process_event(InboundEvent::callback("e1", "c1", "cb1", "yes"));
        settle().await;

        assert_eq!(rx.recv().await.unwrap().text, "yes");
        assert!(rx.try_recv().is_err());
        assert_eq!(ack_rx.recv().await.unwrap(), "cb1");
        assert_eq!(ack_rx.recv().await.unwrap(), "cb1");
    }
}
