use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

pub const CLIENT_NOT_FOUND_MESSAGE: &str = "Server not found or not accessible";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    InvalidField,
    NotFound,
    PermissionDenied,
    AlreadyExists,
    OrganizationNotFound,
    SshUnreachable,
    AuthenticationFailed,
    EngineUnavailable,
    Transaction,
    Cancelled,
    Timeout,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(kind, ToolErrorKind::Timeout),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_field(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidField, "INVALID_FIELD", message)
    }

    pub fn server_not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, "SERVER_NOT_FOUND", message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, code, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::PermissionDenied, "PERMISSION_DENIED", message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::AlreadyExists, "ALREADY_EXISTS", message)
    }

    pub fn organization_not_found(message: impl Into<String>) -> Self {
        Self::new(
            ToolErrorKind::OrganizationNotFound,
            "ORGANIZATION_NOT_FOUND",
            message,
        )
    }

    pub fn ssh_unreachable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::SshUnreachable, "SSH_UNREACHABLE", message)
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::new(
            ToolErrorKind::AuthenticationFailed,
            "AUTHENTICATION_FAILED",
            message,
        )
    }

    pub fn engine_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            ToolErrorKind::EngineUnavailable,
            "ENGINE_UNAVAILABLE",
            message,
        )
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Transaction, "TRANSACTION_FAILED", message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Cancelled, "CANCELLED", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, "TIMEOUT", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, "INTERNAL", message)
    }

    /// True for the two registry outcomes that must look identical to callers.
    pub fn is_access_miss(&self) -> bool {
        matches!(self.code.as_str(), "SERVER_NOT_FOUND" | "PERMISSION_DENIED")
    }

    /// Collapses "does not exist" and "exists but belongs to someone else"
    /// into one generic error so callers cannot probe for foreign records.
    pub fn client_facing(self) -> Self {
        if self.is_access_miss() {
            return ToolError::server_not_found(CLIENT_NOT_FOUND_MESSAGE);
        }
        self
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_facing_merges_not_found_and_permission_denied() {
        let missing = ToolError::server_not_found("server 42 does not exist").client_facing();
        let foreign = ToolError::permission_denied("user 7 does not own server 42").client_facing();
        assert_eq!(missing.code, foreign.code);
        assert_eq!(missing.message, foreign.message);
        assert_eq!(foreign.kind, ToolErrorKind::NotFound);
    }

    #[test]
    fn client_facing_keeps_unrelated_not_found_codes() {
        let err = ToolError::not_found("CONTAINER_NOT_FOUND", "no such container").client_facing();
        assert_eq!(err.code, "CONTAINER_NOT_FOUND");
    }

    #[test]
    fn only_timeouts_are_retryable() {
        assert!(ToolError::timeout("slow").retryable);
        assert!(!ToolError::authentication_failed("nope").retryable);
    }
}
