//! Tool executor: a name to handler dispatch table.
//!
//! Handlers return `Result<String, ToolError>`; the registry turns every
//! failure, including unknown names, into an `Error: ...` text result so
//! nothing crosses the agent loop as an error.

mod builtin;

pub use builtin::{
    format_measurement_reference, parse_measurement_reference, LogMeasurementTool,
    SearchMemoryTool, LOG_MEASUREMENT_TOOL, MEASUREMENT_ENTRY_TYPE, SEARCH_MEMORY_TOOL,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{MnemosError, MnemosResult};
use crate::traits::{Tool, ToolExecutor, TruncationPolicy};

/// Failure inside a single tool execution.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Engine(#[from] MnemosError),
}

impl ToolError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }
}

/// One named capability.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    fn definition(&self) -> Tool;

    fn truncation(&self) -> TruncationPolicy {
        TruncationPolicy::default()
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError>;
}

/// Registry of tool handlers keyed by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Names must be unique.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> MnemosResult<()> {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(MnemosError::tool(format!("tool '{}' is already registered", name)));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn definitions(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.handlers.values().map(|h| h.definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    async fn execute(&self, name: &str, arguments: &serde_json::Value) -> String {
        let Some(handler) = self.handlers.get(name) else {
            warn!(tool = name, "Unknown tool requested");
            return format!("Error: unknown tool '{}'", name);
        };

        match handler.execute(arguments).await {
            Ok(output) => {
                debug!(tool = name, chars = output.len(), "Tool executed");
                output
            }
            Err(e) => {
                warn!(tool = name, error = %e, "Tool execution failed");
                format!("Error: {}", e)
            }
        }
    }

    fn truncation(&self, name: &str) -> TruncationPolicy {
        self.handlers
            .get(name)
            .map(|h| h.truncation())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn definition(&self) -> Tool {
            Tool::new("echo", "Echo the text back", json!({"type": "object"}))
        }

        fn truncation(&self) -> TruncationPolicy {
            TruncationPolicy::Unbounded
        }

        async fn execute(&self, arguments: &serde_json::Value) -> Result<String, ToolError> {
            arguments["text"]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ToolError::invalid("text is required"))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo)).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_dispatch_and_error_text() {
        let registry = registry();

        assert_eq!(registry.execute("echo", &json!({"text": "hi"})).await, "hi");
        assert_eq!(
            registry.execute("echo", &json!({})).await,
            "Error: invalid arguments: text is required"
        );
        assert_eq!(
            registry.execute("teleport", &json!({})).await,
            "Error: unknown tool 'teleport'"
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = registry();
        let err = registry.register(Arc::new(Echo)).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ToolExecutionFailed);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_truncation_defaults_for_unknown() {
        let registry = registry();
        assert_eq!(registry.truncation("echo"), TruncationPolicy::Unbounded);
        assert_eq!(registry.truncation("other"), TruncationPolicy::default());
        assert_eq!(registry.definitions()[0].name, "echo");
    }
}
