//! Bounded, time-limited cache of inbound event identities.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::types::InboundEvent;

#[derive(Debug)]
struct Entry {
    seq: u64,
    keys: Vec<String>,
    inserted_at: Instant,
}

/// Remembers recently seen events by envelope id, callback id and
/// conversation-scoped message id.
///
/// Entries expire after `ttl`; once more than `capacity` events are held the
/// oldest is evicted first. Process-local and rebuilt empty on restart.
#[derive(Debug)]
pub struct DedupCache {
    ttl: Duration,
    capacity: usize,
    entries: VecDeque<Entry>,
    /// key -> seq of the entry that owns it
    index: HashMap<String, u64>,
    next_seq: u64,
}

fn identity_keys(event: &InboundEvent) -> Vec<String> {
    let mut keys = vec![format!("env:{}", event.envelope_id)];
    if let Some(callback_id) = &event.callback_id {
        keys.push(format!("cb:{}", callback_id));
    }
    if let Some(message_id) = event.message_id {
        keys.push(format!("msg:{}:{}", event.conversation_id, message_id));
    }
    keys
}

impl DedupCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            index: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any identity of `event` was seen within the TTL.
    pub fn is_duplicate(&self, event: &InboundEvent, now: Instant) -> bool {
        let oldest_live = self.oldest_live_seq(now);
        identity_keys(event).iter().any(|key| {
            self.index
                .get(key)
                .map(|&seq| oldest_live.is_some_and(|oldest| seq >= oldest))
                .unwrap_or(false)
        })
    }

    /// Check and record in one step. Returns `true` for duplicates, which
    /// are not recorded again.
    pub fn check_and_record(&mut self, event: &InboundEvent, now: Instant) -> bool {
        self.expire(now);
        if self.is_duplicate(event, now) {
            return true;
        }
        self.record(event, now);
        false
    }

    fn record(&mut self, event: &InboundEvent, now: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let keys = identity_keys(event);
        for key in &keys {
            self.index.insert(key.clone(), seq);
        }
        self.entries.push_back(Entry {
            seq,
            keys,
            inserted_at: now,
        });
        while self.entries.len() > self.capacity {
            self.evict_front();
        }
    }

    fn oldest_live_seq(&self, now: Instant) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| now.duration_since(e.inserted_at) < self.ttl)
            .map(|e| e.seq)
    }

    fn expire(&mut self, now: Instant) {
        while self
            .entries
            .front()
            .is_some_and(|e| now.duration_since(e.inserted_at) >= self.ttl)
        {
            self.evict_front();
        }
    }

    fn evict_front(&mut self) {
        if let Some(entry) = self.entries.pop_front() {
            for key in entry.keys {
                if self.index.get(&key) == Some(&entry.seq) {
                    self.index.remove(&key);
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}
