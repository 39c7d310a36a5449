use super::{ToolError, ToolErrorKind};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(i32)]
pub enum ErrorCode {
    ToolFailed = -32000,
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RpcError {}

impl From<ToolError> for RpcError {
    fn from(err: ToolError) -> Self {
        let err = err.client_facing();
        let code = match err.kind {
            ToolErrorKind::InvalidField => ErrorCode::InvalidParams,
            ToolErrorKind::Internal => ErrorCode::InternalError,
            _ => ErrorCode::ToolFailed,
        };
        let data = serde_json::to_value(&err).ok();
        Self {
            code,
            message: err.message,
            data,
        }
    }
}
