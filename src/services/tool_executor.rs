use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::utils::redact::redact_value;
use crate::utils::tool_errors::unknown_tool_error;

use serde_json::Value;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, args: Value) -> Result<Value, ToolError>;
}

/// Routes a named call to its handler. Errors leave here already collapsed
/// to their client-facing form.
#[derive(Clone)]
pub struct ToolExecutor {
    logger: Logger,
    handlers: Arc<BTreeMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolExecutor {
    pub fn new(logger: Logger, handlers: BTreeMap<String, Arc<dyn ToolHandler>>) -> Self {
        Self {
            logger: logger.child("executor"),
            handlers: Arc::new(handlers),
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.handlers.contains_key(tool)
    }

    pub async fn execute(&self, tool: &str, args: Value) -> Result<Value, ToolError> {
        let handler = self
            .handlers
            .get(tool)
            .cloned()
            .ok_or_else(|| unknown_tool_error(tool, &self.tool_names()))?;

        self.logger.debug(
            "tool call",
            Some(&serde_json::json!({"tool": tool, "args": redact_value(&args)})),
        );
        let started = Instant::now();
        let result = handler.handle(args).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                self.logger.debug(
                    "tool call finished",
                    Some(&serde_json::json!({"tool": tool, "duration_ms": elapsed_ms})),
                );
                Ok(value)
            }
            Err(err) => {
                self.logger.warn(
                    "tool call failed",
                    Some(&serde_json::json!({
                        "tool": tool,
                        "code": err.code,
                        "error": err.message,
                        "duration_ms": elapsed_ms,
                    })),
                );
                Err(err.client_facing())
            }
        }
    }
}
