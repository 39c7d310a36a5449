use crate::errors::ToolError;
use crate::managers::{caller, optional_str, request_context, required_str, to_json};
use crate::services::containers::{ContainerAction, ContainerControl};
use crate::services::logger::Logger;
use crate::services::registry::ServerRegistry;
use crate::services::validation::Validation;
use crate::utils::tool_errors::unknown_action_error;
use serde_json::Value;
use std::sync::Arc;

const CONTAINER_ACTIONS: &[&str] = &["inspect", "start", "stop", "restart", "remove"];

#[derive(Clone)]
pub struct ContainersManager {
    logger: Logger,
    validation: Validation,
    registry: Arc<ServerRegistry>,
    control: ContainerControl,
}

impl ContainersManager {
    pub fn new(logger: Logger, registry: Arc<ServerRegistry>, control: ContainerControl) -> Self {
        Self {
            logger: logger.child("containers"),
            validation: Validation::new(),
            registry,
            control,
        }
    }

    pub async fn handle_action(&self, args: Value) -> Result<Value, ToolError> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        if !CONTAINER_ACTIONS.contains(&action) {
            return Err(unknown_action_error(
                "containers",
                args.get("action"),
                CONTAINER_ACTIONS,
            ));
        }
        let (user_id, _) = caller(&self.validation, &args)?;
        let container_id = required_str(&args, "container_id")?;
        let target = self
            .registry
            .resolve_target(optional_str(&args, "server_id"), user_id)
            .await?;
        let ctx = request_context(&args)?.with_target(target);

        if action == "inspect" {
            let info = self.control.inspect(&ctx, container_id).await?;
            return Ok(serde_json::json!({"container": to_json(&info)?}));
        }
        let action: ContainerAction = action.parse()?;
        let outcome = self.control.apply(&ctx, container_id, action).await?;
        to_json(&outcome)
    }
}

#[async_trait::async_trait]
impl crate::services::tool_executor::ToolHandler for ContainersManager {
    async fn handle(&self, args: Value) -> Result<Value, ToolError> {
        self.logger
            .debug("handle_action", Some(&serde_json::json!({"action": args.get("action")})));
        self.handle_action(args).await
    }
}
