//! Accumulators for fragmented text and media groups.
//!
//! Both buffers are plain data; timers and flush decisions live in the gate.

use crate::types::{EventKind, InboundEvent, LogicalTurn};

/// Joins fragments and captions into one turn.
pub const PART_SEPARATOR: &str = "\n";

/// Successive long-text continuations from one conversation.
#[derive(Debug)]
pub struct FragmentBuffer {
    conversation_id: String,
    envelope_id: String,
    first_message_id: Option<i64>,
    last_message_id: Option<i64>,
    fragments: Vec<String>,
    chars: usize,
    /// Bumped on every append; a timer only flushes the generation it armed.
    pub(crate) generation: u64,
}

impl FragmentBuffer {
    pub fn start(event: &InboundEvent, generation: u64) -> Self {
        Self {
            conversation_id: event.conversation_id.clone(),
            envelope_id: event.envelope_id.clone(),
            first_message_id: event.message_id,
            last_message_id: event.message_id,
            fragments: vec![event.text.clone().unwrap_or_default()],
            chars: event.text_len(),
            generation,
        }
    }

    /// True when `event` carries the next sequence id after the last fragment.
    pub fn is_contiguous(&self, event: &InboundEvent) -> bool {
        match (self.last_message_id, event.message_id) {
            (Some(last), Some(next)) => next == last + 1,
            _ => false,
        }
    }

    /// Whether appending `extra` characters would push the buffer past `cap`.
    pub fn would_exceed(&self, extra: usize, cap: usize) -> bool {
        self.chars + PART_SEPARATOR.len() + extra > cap
    }

    pub fn push(&mut self, event: &InboundEvent, generation: u64) {
        self.chars += PART_SEPARATOR.len() + event.text_len();
        self.fragments.push(event.text.clone().unwrap_or_default());
        self.last_message_id = event.message_id;
        self.generation = generation;
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Collapse into one turn carrying the first fragment's identifiers.
    pub fn into_turn(self) -> LogicalTurn {
        LogicalTurn {
            conversation_id: self.conversation_id,
            envelope_id: self.envelope_id,
            message_id: self.first_message_id,
            parts: self.fragments.len(),
            text: self.fragments.join(PART_SEPARATOR),
            kind: EventKind::Message,
        }
    }
}

/// Items submitted together under one media group id.
#[derive(Debug)]
pub struct MediaGroupBuffer {
    conversation_id: String,
    envelope_id: String,
    message_id: Option<i64>,
    captions: Vec<String>,
    parts: usize,
    pub(crate) generation: u64,
}

impl MediaGroupBuffer {
    pub fn start(event: &InboundEvent, generation: u64) -> Self {
        let mut buffer = Self {
            conversation_id: event.conversation_id.clone(),
            envelope_id: event.envelope_id.clone(),
            message_id: event.message_id,
            captions: Vec::new(),
            parts: 0,
            generation,
        };
        buffer.push(event, generation);
        buffer
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn push(&mut self, event: &InboundEvent, generation: u64) {
        if let Some(caption) = event.text.as_deref().map(str::trim) {
            if !caption.is_empty() {
                self.captions.push(caption.to_string());
            }
        }
        self.parts += 1;
        self.generation = generation;
    }

    /// Collapse into one turn; `placeholder` stands in when nothing had a caption.
    pub fn into_turn(self, placeholder: &str) -> LogicalTurn {
        let text = if self.captions.is_empty() {
            placeholder.to_string()
        } else {
            self.captions.join(PART_SEPARATOR)
        };
        LogicalTurn {
            conversation_id: self.conversation_id,
            envelope_id: self.envelope_id,
            message_id: self.message_id,
            text,
            kind: EventKind::Message,
            parts: self.parts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_contiguity_and_join() {
        let first = InboundEvent::text("e1", "c1", 10, "alpha");
        let mut buffer = FragmentBuffer::start(&first, 0);

        assert!(!buffer.is_contiguous(&InboundEvent::text("e2", "c1", 12, "gap")));
        let next = InboundEvent::text("e2", "c1", 11, "beta");
        assert!(buffer.is_contiguous(&next));
        buffer.push(&next, 1);

        assert_eq!(buffer.len(), 2);
        let turn = buffer.into_turn();
        assert_eq!(turn.text, "alpha\nbeta");
        assert_eq!(turn.envelope_id, "e1");
        assert_eq!(turn.message_id, Some(10));
        assert_eq!(turn.parts, 2);
    }

    #[test]
    fn test_fragment_cap_counts_separator() {
        let buffer = FragmentBuffer::start(&InboundEvent::text("e1", "c1", 1, "x".repeat(10)), 0);
        assert!(!buffer.would_exceed(9, 20));
        assert!(buffer.would_exceed(10, 20));
    }

    #[test]
    fn test_media_group_captions_or_placeholder() {
        let photo = |env: &str, text: &str| {
            InboundEvent::text(env, "c1", 1, text).in_media_group("g1")
        };

        let mut captioned = MediaGroupBuffer::start(&photo("e1", ""), 0);
        captioned.push(&photo("e2", "the view from the hotel"), 1);
        captioned.push(&photo("e3", "and breakfast"), 2);
        let turn = captioned.into_turn("[media]");
        assert_eq!(turn.text, "the view from the hotel\nand breakfast");
        assert_eq!(turn.parts, 3);
        assert_eq!(turn.envelope_id, "e1");

        let bare = MediaGroupBuffer::start(&photo("e4", "  "), 0);
        assert_eq!(bare.into_turn("[media]").text, "[media]");
    }
}
