//! Inbound events and the logical turns the gate emits.

use serde::{Deserialize, Serialize};

/// Whether an inbound event carries text or an interactive callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    #[default]
    Message,
    Callback,
}

/// A raw event as delivered by the messaging platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Platform-wide envelope identity.
    pub envelope_id: String,
    pub conversation_id: String,
    /// Conversation-scoped sequence id; contiguous for continuations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    /// Secondary identity for interactive callbacks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_group_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub kind: EventKind,
}

impl InboundEvent {
    pub fn text(
        envelope_id: impl Into<String>,
        conversation_id: impl Into<String>,
        message_id: i64,
        text: impl Into<String>,
    ) -> Self {
        Self {
            envelope_id: envelope_id.into(),
            conversation_id: conversation_id.into(),
            message_id: Some(message_id),
            callback_id: None,
            media_group_id: None,
            text: Some(text.into()),
            kind: EventKind::Message,
        }
    }

    pub fn callback(
        envelope_id: impl Into<String>,
        conversation_id: impl Into<String>,
        callback_id: impl Into<String>,
        data: impl Into<String>,
    ) -> Self {
        Self {
            envelope_id: envelope_id.into(),
            conversation_id: conversation_id.into(),
            message_id: None,
            callback_id: Some(callback_id.into()),
            media_group_id: None,
            text: Some(data.into()),
            kind: EventKind::Callback,
        }
    }

    pub fn in_media_group(mut self, group_id: impl Into<String>) -> Self {
        self.media_group_id = Some(group_id.into());
        self
    }

    pub fn text_len(&self) -> usize {
        self.text.as_deref().map(|t| t.chars().count()).unwrap_or(0)
    }
}

/// One unit of work handed to the per-conversation handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalTurn {
    pub conversation_id: String,
    /// Envelope id of the first contributing event.
    pub envelope_id: String,
    pub message_id: Option<i64>,
    pub text: String,
    pub kind: EventKind,
    /// How many inbound events were merged into this turn.
    pub parts: usize,
}

impl LogicalTurn {
    pub fn from_event(event: &InboundEvent) -> Self {
        Self {
            conversation_id: event.conversation_id.clone(),
            envelope_id: event.envelope_id.clone(),
            message_id: event.message_id,
            text: event.text.clone().unwrap_or_default(),
            kind: event.kind,
            parts: 1,
        }
    }
}
