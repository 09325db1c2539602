//! Built-in tools: memory search and measurement logging.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::{ToolError, ToolHandler};
use crate::retrieval::Retriever;
use crate::traits::{Measurement, MeasurementLog, Tool, TruncationPolicy};

pub const SEARCH_MEMORY_TOOL: &str = "search_memory";
pub const LOG_MEASUREMENT_TOOL: &str = "log_measurement";

/// Entry type used when linking a pattern to a logged measurement.
pub const MEASUREMENT_ENTRY_TYPE: &str = "measurement";

/// Lines of search output kept when the result is persisted.
const SEARCH_PERSISTED_LINES: usize = 12;

static MEASUREMENT_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(measurement #(\d+)\)").unwrap());

pub fn format_measurement_reference(id: i64) -> String {
    format!("(measurement #{})", id)
}

/// Record id of a measurement mentioned in a `log_measurement` result.
pub fn parse_measurement_reference(text: &str) -> Option<i64> {
    MEASUREMENT_REFERENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Searches remembered patterns.
pub struct SearchMemoryTool {
    retriever: Arc<Retriever>,
}

impl SearchMemoryTool {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
}

#[async_trait]
impl ToolHandler for SearchMemoryTool {
    fn name(&self) -> &str {
        SEARCH_MEMORY_TOOL
    }

    fn definition(&self) -> Tool {
        Tool::new(
            SEARCH_MEMORY_TOOL,
            "Search what you remember about the user. Use when the current context does not already answer the question.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "What to look for, in plain words"}
                },
                "required": ["query"]
            }),
        )
    }

    fn truncation(&self) -> TruncationPolicy {
        TruncationPolicy::Lines(SEARCH_PERSISTED_LINES)
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
        let args: SearchArgs = serde_json::from_value(arguments.clone())
            .map_err(|e| ToolError::invalid(e.to_string()))?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err(ToolError::invalid("query must not be empty"));
        }

        let outcome = self.retriever.retrieve(query).await;
        if outcome.degraded {
            return Err(ToolError::Failed(
                "memory search is unavailable right now".to_string(),
            ));
        }
        if outcome.patterns.is_empty() {
            return Ok("No matching memories.".to_string());
        }

        let lines: Vec<String> = outcome
            .patterns
            .iter()
            .map(|r| {
                format!(
                    "- [{}] {} (confidence {:.2})",
                    r.pattern.kind, r.pattern.content, r.pattern.confidence
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Records a body measurement.
pub struct LogMeasurementTool {
    log: Arc<dyn MeasurementLog>,
}

impl LogMeasurementTool {
    pub fn new(log: Arc<dyn MeasurementLog>) -> Self {
        Self { log }
    }
}

#[derive(Debug, Deserialize)]
struct MeasurementArgs {
    kind: String,
    value: f64,
    unit: String,
}

#[async_trait]
impl ToolHandler for LogMeasurementTool {
    fn name(&self) -> &str {
        LOG_MEASUREMENT_TOOL
    }

    fn definition(&self) -> Tool {
        Tool::new(
            LOG_MEASUREMENT_TOOL,
            "Log a body measurement the user reported, such as weight, body fat or resting heart rate.",
            json!({
                "type": "object",
                "properties": {
                    "kind": {"type": "string", "description": "Measurement name, e.g. weight"},
                    "value": {"type": "number"},
                    "unit": {"type": "string", "description": "Unit, e.g. kg, lb, %, bpm"}
                },
                "required": ["kind", "value", "unit"]
            }),
        )
    }

    fn truncation(&self) -> TruncationPolicy {
        TruncationPolicy::Unbounded
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
        let args: MeasurementArgs = serde_json::from_value(arguments.clone())
            .map_err(|e| ToolError::invalid(e.to_string()))?;

        let kind = args.kind.trim().to_lowercase();
        let unit = args.unit.trim().to_string();
        if kind.is_empty() {
            return Err(ToolError::invalid("kind must not be empty"));
        }
        if unit.is_empty() {
            return Err(ToolError::invalid("unit must not be empty"));
        }
        if !args.value.is_finite() || args.value <= 0.0 {
            return Err(ToolError::invalid("value must be a positive number"));
        }

        let id = self
            .log
            .record_measurement(Measurement {
                kind: kind.clone(),
                value: args.value,
                unit: unit.clone(),
                recorded_at: Utc::now(),
            })
            .await?;

        Ok(format!(
            "Logged {} {} {} {}",
            kind,
            args.value,
            unit,
            format_measurement_reference(id)
        ))
    }
}
