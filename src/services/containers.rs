use crate::errors::ToolError;
use crate::services::context::ExecutionContext;
use crate::services::guard::ProtectedTargetGuard;
use crate::services::logger::Logger;
use crate::services::resolver::{ConnectionResolver, EngineHandle, EngineOrigin};
use crate::transport::ContainerInfo;
use serde::Serialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
    Remove,
}

impl ContainerAction {
    pub const ALL: [ContainerAction; 4] = [
        ContainerAction::Start,
        ContainerAction::Stop,
        ContainerAction::Restart,
        ContainerAction::Remove,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
            ContainerAction::Remove => "remove",
        }
    }
}

impl FromStr for ContainerAction {
    type Err = ToolError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        ContainerAction::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| {
                ToolError::invalid_field(format!("unknown container action: {}", value))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ContainerOutcome {
    Applied {
        action: ContainerAction,
        container_id: String,
        name: String,
    },
    Skipped {
        action: ContainerAction,
        container_id: String,
        name: String,
        reason: String,
    },
}

impl ContainerOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ContainerOutcome::Skipped { .. })
    }
}

/// Container operations over a per-call engine handle.
#[derive(Clone)]
pub struct ContainerControl {
    logger: Logger,
    resolver: ConnectionResolver,
    guard: ProtectedTargetGuard,
}

impl ContainerControl {
    pub fn new(logger: Logger, resolver: ConnectionResolver, guard: ProtectedTargetGuard) -> Self {
        Self {
            logger: logger.child("containers"),
            resolver,
            guard,
        }
    }

    pub async fn inspect(
        &self,
        ctx: &ExecutionContext,
        container_id: &str,
    ) -> Result<ContainerInfo, ToolError> {
        let handle = self.resolver.engine(ctx).await?;
        let info = handle.engine().inspect(container_id).await;
        handle.close();
        info
    }

    /// Looks up the container's name, lets the guard veto, then runs the
    /// action. A failed lookup aborts before anything is changed.
    pub async fn apply(
        &self,
        ctx: &ExecutionContext,
        container_id: &str,
        action: ContainerAction,
    ) -> Result<ContainerOutcome, ToolError> {
        let handle = self.resolver.engine(ctx).await?;
        let result = self.apply_with(&handle, ctx, container_id, action).await;
        handle.close();
        result
    }

    async fn apply_with(
        &self,
        handle: &EngineHandle,
        ctx: &ExecutionContext,
        container_id: &str,
        action: ContainerAction,
    ) -> Result<ContainerOutcome, ToolError> {
        let engine = handle.engine();
        let info = engine.inspect(container_id).await?;
        if self.guard.is_protected(&info.name) {
            self.logger.info(
                "skipping protected container",
                Some(&serde_json::json!({
                    "action": action.as_str(),
                    "container": info.name,
                })),
            );
            return Ok(ContainerOutcome::Skipped {
                action,
                container_id: container_id.to_string(),
                name: info.name,
                reason: format!(
                    "container belongs to the platform ({})",
                    self.guard.marker()
                ),
            });
        }
        ctx.check()?;

        match action {
            ContainerAction::Start => engine.start(container_id).await?,
            ContainerAction::Stop => engine.stop(container_id).await?,
            ContainerAction::Restart => engine.restart(container_id).await?,
            ContainerAction::Remove => engine.remove(container_id, true).await?,
        }
        self.logger.info(
            "container action applied",
            Some(&serde_json::json!({
                "action": action.as_str(),
                "container": info.name,
                "local": handle.origin() == EngineOrigin::LocalSocket,
            })),
        );
        Ok(ContainerOutcome::Applied {
            action,
            container_id: container_id.to_string(),
            name: info.name,
        })
    }
}
