//! Prompt templates for pattern extraction.

use chrono::Utc;

use crate::types::{Pattern, Turn, TurnRole};

/// System instructions for the extraction call.
pub fn extraction_system_prompt(max_new_patterns: usize) -> String {
    let date = Utc::now().format("%Y-%m-%d").to_string();
    format!(
        r#"You maintain the long-term memory of a personal assistant. You read a slice of conversation and decide which durable facts about the user it establishes, confirms, contradicts or replaces.

Rules:
- Each pattern states exactly one claim. Split compound statements.
- Resolve pronouns and relative references to concrete referents ("my sister" -> "the user's sister Ana", "yesterday" -> an absolute date when known).
- Return at most {max} new patterns, most important first.
- Evidence must cite turn ids whose role is "user" or "tool". Never cite "assistant" turns; the assistant's own words are not evidence.
- Use "explicit" when the user stated the claim directly and "implicit" when you inferred it.
- Confidence is a number between 0 and 1.
- Kind is one of: behavior, emotion, belief, goal, preference, temporal, causal, fact, event. Use "event" only for one-off occurrences.
- Prefer reinforcing or superseding an existing pattern over creating a near-duplicate.
- When nothing durable was said, return empty lists.

Today's date is {date}.

Respond with JSON only, in exactly this shape:
{{
  "new_patterns": [
    {{"content": "...", "kind": "preference", "confidence": 0.8, "signal": "explicit", "evidence": [12, 14]}}
  ],
  "reinforcements": [
    {{"pattern_id": "<existing id>", "confidence": 0.7, "signal": "implicit", "evidence": [15]}}
  ],
  "contradictions": [
    {{"pattern_id": "<existing id>", "evidence": [16]}}
  ],
  "supersessions": [
    {{"old_pattern_id": "<existing id>", "content": "...", "kind": "fact", "confidence": 0.9, "signal": "explicit", "evidence": [17]}}
  ]
}}"#,
        max = max_new_patterns,
        date = date
    )
}

fn role_label(role: TurnRole) -> &'static str {
    match role {
        TurnRole::User => "user",
        TurnRole::Assistant => "assistant",
        TurnRole::Tool => "tool",
    }
}

/// Conversation slice and existing patterns, formatted for the extraction call.
pub fn build_extraction_message(turns: &[Turn], existing: &[Pattern]) -> String {
    let memory = if existing.is_empty() {
        "Existing patterns: none.".to_string()
    } else {
        let lines: Vec<String> = existing
            .iter()
            .map(|p| {
                format!(
                    "- id={} [{}] {} (confidence {:.2})",
                    p.id, p.kind, p.content, p.confidence
                )
            })
            .collect();
        format!("Existing patterns:\n{}", lines.join("\n"))
    };

    let conversation: Vec<String> = turns
        .iter()
        .map(|t| match (&t.role, &t.tool_name) {
            (TurnRole::Tool, Some(tool)) => {
                format!("[#{} tool:{}] {}", t.id, tool, t.content)
            }
            _ => format!("[#{} {}] {}", t.id, role_label(t.role), t.content),
        })
        .collect();

    format!("{}\n\nConversation:\n{}", memory, conversation.join("\n"))
}
