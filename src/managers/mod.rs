pub mod containers;
pub mod remote;
pub mod servers;

pub use containers::ContainersManager;
pub use remote::RemoteManager;
pub use servers::ServersManager;

use crate::errors::ToolError;
use crate::models::Identity;
use crate::services::context::ExecutionContext;
use crate::services::validation::Validation;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Caller identity as `(user_id, organization_id)`.
pub(crate) fn caller(validation: &Validation, args: &Value) -> Result<(Uuid, Uuid), ToolError> {
    let identity = Identity::from_args(args)?;
    let user_id = validation.validate_id(&identity.user_id, "identity.user_id")?;
    let organization_id =
        validation.validate_id(&identity.organization_id, "identity.organization_id")?;
    Ok((user_id, organization_id))
}

/// Fresh per-request context, bounded by `timeout_ms` when given.
pub(crate) fn request_context(args: &Value) -> Result<ExecutionContext, ToolError> {
    let ctx = ExecutionContext::new();
    match args.get("timeout_ms") {
        None | Some(Value::Null) => Ok(ctx),
        Some(raw) => match raw.as_u64() {
            Some(ms) if ms > 0 => Ok(ctx.with_timeout(Duration::from_millis(ms))),
            _ => Err(ToolError::invalid_field("timeout_ms must be a positive integer")),
        },
    }
}

pub(crate) fn parse_args<T: DeserializeOwned>(args: &Value, what: &str) -> Result<T, ToolError> {
    serde_json::from_value(args.clone())
        .map_err(|err| ToolError::invalid_field(format!("{}: {}", what, err)))
}

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::invalid_field(format!("{} is required", key)))
}

pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|err| ToolError::internal(err.to_string()))
}
