mod rpc_error;
mod tool_error;

pub use rpc_error::{ErrorCode, RpcError};
pub use tool_error::{ToolError, ToolErrorKind, CLIENT_NOT_FOUND_MESSAGE};
