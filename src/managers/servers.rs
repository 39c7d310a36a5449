use crate::errors::ToolError;
use crate::managers::{caller, parse_args, request_context, required_str, to_json};
use crate::models::{CreateServerRequest, ServerQueryParams, UpdateServerRequest};
use crate::services::logger::Logger;
use crate::services::registry::ServerRegistry;
use crate::services::validation::Validation;
use crate::utils::tool_errors::unknown_action_error;
use serde_json::Value;
use std::sync::Arc;

const SERVER_ACTIONS: &[&str] = &["create", "get", "update", "update_status", "delete", "list"];

#[derive(Clone)]
pub struct ServersManager {
    logger: Logger,
    validation: Validation,
    registry: Arc<ServerRegistry>,
}

impl ServersManager {
    pub fn new(logger: Logger, registry: Arc<ServerRegistry>) -> Self {
        Self {
            logger: logger.child("servers"),
            validation: Validation::new(),
            registry,
        }
    }

    pub async fn handle_action(&self, args: Value) -> Result<Value, ToolError> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("");
        if !SERVER_ACTIONS.contains(&action) {
            return Err(unknown_action_error("servers", args.get("action"), SERVER_ACTIONS));
        }
        let (user_id, organization_id) = caller(&self.validation, &args)?;
        match action {
            "create" => {
                let request: CreateServerRequest = parse_args(&args, "create request")?;
                let server = self
                    .registry
                    .create(&request_context(&args)?, &request, user_id, organization_id)
                    .await?;
                Ok(serde_json::json!({"server": to_json(&server.summary())?}))
            }
            "get" => {
                let server = self
                    .registry
                    .get(required_str(&args, "id")?, user_id)
                    .await?;
                Ok(serde_json::json!({"server": to_json(&server.summary())?}))
            }
            "update" => {
                let request: UpdateServerRequest = parse_args(&args, "update request")?;
                let ctx = request_context(&args)?;
                let server = self.registry.update(&ctx, &request, user_id).await?;
                Ok(serde_json::json!({"server": to_json(&server.summary())?}))
            }
            "update_status" => {
                let server = self
                    .registry
                    .update_status(
                        required_str(&args, "id")?,
                        required_str(&args, "status")?,
                        user_id,
                    )
                    .await?;
                Ok(serde_json::json!({"server": to_json(&server.summary())?}))
            }
            "delete" => {
                let server = self
                    .registry
                    .delete(required_str(&args, "id")?, user_id)
                    .await?;
                Ok(serde_json::json!({"deleted": true, "id": server.id}))
            }
            _ => {
                let params: ServerQueryParams = parse_args(&args, "list query")?;
                let page = self
                    .registry
                    .list(organization_id, user_id, &params)
                    .await?;
                to_json(&page)
            }
        }
    }
}

#[async_trait::async_trait]
impl crate::services::tool_executor::ToolHandler for ServersManager {
    async fn handle(&self, args: Value) -> Result<Value, ToolError> {
        self.logger
            .debug("handle_action", Some(&serde_json::json!({"action": args.get("action")})));
        self.handle_action(args).await
    }
}
