//! Conversation turn types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::message::{Message, MessageRole};

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

impl TurnRole {
    /// Only end-user and tool-output turns may justify a memory claim.
    pub fn is_evidence(&self) -> bool {
        matches!(self, TurnRole::User | TurnRole::Tool)
    }
}

/// A persisted exchange unit. Immutable once written except for
/// `compacted_at`, which is set exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: i64,
    pub conversation_id: String,
    pub role: TurnRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compacted_at: Option<DateTime<Utc>>,
}

impl Turn {
    pub fn is_compacted(&self) -> bool {
        self.compacted_at.is_some()
    }

    /// Convert to a transcript message for the reasoning engine.
    ///
    /// Tool outputs are replayed as user-visible context rather than as tool
    /// messages, since the originating tool request is not persisted.
    pub fn to_message(&self) -> Message {
        match self.role {
            TurnRole::User => Message::user(self.content.clone()),
            TurnRole::Assistant => Message::assistant(self.content.clone()),
            TurnRole::Tool => Message {
                role: MessageRole::User,
                content: format!(
                    "[tool output: {}]\n{}",
                    self.tool_name.as_deref().unwrap_or("tool"),
                    self.content
                ),
                name: None,
                tool_call_id: None,
                tool_calls: Vec::new(),
            },
        }
    }
}

/// A turn about to be appended.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub conversation_id: String,
    pub role: TurnRole,
    pub content: String,
    pub envelope_id: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
}

impl NewTurn {
    pub fn user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            role: TurnRole::User,
            content: content.into(),
            envelope_id: None,
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn assistant(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            ..Self::user(conversation_id, content)
        }
    }

    pub fn tool(
        conversation_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: TurnRole::Tool,
            tool_name: Some(tool_name.into()),
            tool_call_id: Some(tool_call_id.into()),
            ..Self::user(conversation_id, content)
        }
    }

    pub fn with_envelope(mut self, envelope_id: impl Into<String>) -> Self {
        self.envelope_id = Some(envelope_id.into());
        self
    }
}

/// Rough token estimate used by budget checks (four characters per token).
pub fn estimate_tokens(chars: usize) -> usize {
    chars.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_evidence_roles_exclude_assistant() {
        assert!(TurnRole::User.is_evidence());
        assert!(TurnRole::Tool.is_evidence());
        assert!(!TurnRole::Assistant.is_evidence());
    }

    #[test]
    fn test_role_round_trips_through_text() {
        assert_eq!(TurnRole::Tool.to_string(), "tool");
        assert_eq!(TurnRole::from_str("assistant").unwrap(), TurnRole::Assistant);
    }

    #[test]
    fn test_token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(8), 2);
        assert_eq!(estimate_tokens(9), 3);
    }
}
