use crate::errors::ToolError;
use serde::Deserialize;
use serde_json::Value;

/// Caller identity as resolved by the upstream session layer. Trusted as given.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub organization_id: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
        }
    }

    pub fn from_args(args: &Value) -> Result<Self, ToolError> {
        let raw = args
            .get("identity")
            .filter(|v| v.is_object())
            .ok_or_else(|| {
                ToolError::invalid_field("identity is required")
                    .with_hint("Pass identity: { user_id, organization_id }.")
            })?;
        serde_json::from_value(raw.clone())
            .map_err(|err| ToolError::invalid_field(format!("identity: {}", err)))
    }
}
