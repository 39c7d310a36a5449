use crate::errors::ToolError;
use crate::managers::{caller, optional_str, request_context, required_str};
use crate::services::context::ExecutionContext;
use crate::services::logger::Logger;
use crate::services::registry::ServerRegistry;
use crate::services::resolver::ConnectionResolver;
use crate::services::validation::Validation;
use crate::utils::tool_errors::unknown_action_error;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

const REMOTE_ACTIONS: &[&str] = &["exec", "test"];

/// One-shot commands on a registered server or, without `server_id`, on the
/// platform's default host.
#[derive(Clone)]
pub struct RemoteManager {
    logger: Logger,
    validation: Validation,
    registry: Arc<ServerRegistry>,
    resolver: ConnectionResolver,
}

impl RemoteManager {
    pub fn new(
        logger: Logger,
        registry: Arc<ServerRegistry>,
        resolver: ConnectionResolver,
    ) -> Self {
        Self {
            logger: logger.child("remote"),
            validation: Validation::new(),
            registry,
            resolver,
        }
    }

    pub async fn handle_action(&self, args: Value) -> Result<Value, ToolError> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        match action {
            "exec" => self.exec(&args).await,
            "test" => self.test(&args).await,
            _ => Err(unknown_action_error("remote", args.get("action"), REMOTE_ACTIONS)),
        }
    }

    async fn context_for(
        &self,
        args: &Value,
        user_id: Uuid,
    ) -> Result<ExecutionContext, ToolError> {
        let target = self
            .registry
            .resolve_target(optional_str(args, "server_id"), user_id)
            .await?;
        Ok(request_context(args)?.with_target(target))
    }

    async fn exec(&self, args: &Value) -> Result<Value, ToolError> {
        let (user_id, _) = caller(&self.validation, args)?;
        let command = required_str(args, "command")?;
        let ctx = self.context_for(args, user_id).await?;

        let mut handle = self.resolver.connect(&ctx).await?;
        let output = handle.run(command).await;
        let source = handle.source();
        handle.close().await;
        let output = output?;

        self.logger.info(
            "remote command finished",
            Some(&serde_json::json!({
                "target": source.describe(),
                "exit_code": output.exit_code,
            })),
        );
        Ok(serde_json::json!({
            "target": source.describe(),
            "stdout": output.stdout,
            "stderr": output.stderr,
            "exit_code": output.exit_code,
            "success": output.success(),
        }))
    }

    async fn test(&self, args: &Value) -> Result<Value, ToolError> {
        let (user_id, _) = caller(&self.validation, args)?;
        let ctx = self.context_for(args, user_id).await?;
        let handle = self.resolver.connect(&ctx).await?;
        let source = handle.source();
        handle.close().await;
        Ok(serde_json::json!({"reachable": true, "target": source.describe()}))
    }
}

#[async_trait::async_trait]
impl crate::services::tool_executor::ToolHandler for RemoteManager {
    async fn handle(&self, args: Value) -> Result<Value, ToolError> {
        self.logger
            .debug("handle_action", Some(&serde_json::json!({"action": args.get("action")})));
        self.handle_action(args).await
    }
}
