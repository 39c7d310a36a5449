use crate::app::App;
use crate::errors::{ErrorCode, RpcError, ToolError};
use crate::rpc::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::services::config::PlatformConfig;
use crate::utils::tool_errors::unknown_tool_error;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

const SERVER_NAME: &str = "hostctl";

/// Line-delimited JSON-RPC 2.0. Each tool is a method; `params` are the
/// tool arguments.
pub struct RpcServer {
    app: Arc<App>,
}

impl RpcServer {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    /// Handles one input line. `None` means nothing is written back.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let parsed: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    RpcError::new(ErrorCode::ParseError, "Parse error"),
                ))
            }
        };
        let request = match serde_json::from_value::<JsonRpcRequest>(parsed) {
            Ok(request) if request.jsonrpc == "2.0" => request,
            _ => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    RpcError::new(ErrorCode::InvalidRequest, "Invalid request"),
                ))
            }
        };

        let result = self.dispatch(&request.method, request.params).await;
        let id = request.id?;
        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => JsonRpcResponse::failure(id, err),
        })
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        if method == "ping" {
            return Ok(serde_json::json!({
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
                "tools": self.app.tool_executor.tool_names(),
            }));
        }
        if !self.app.tool_executor.has_tool(method) {
            let known = self.app.tool_executor.tool_names();
            let mut err = RpcError::from(unknown_tool_error(method, &known));
            err.code = ErrorCode::MethodNotFound;
            return Err(err);
        }
        let params = if params.is_null() {
            Value::Object(Default::default())
        } else {
            params
        };
        Ok(self.app.tool_executor.execute(method, params).await?)
    }

    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), ToolError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut writer = BufWriter::new(writer);
        while let Some(line) = lines.next_line().await? {
            if let Some(response) = self.handle_line(&line).await {
                let payload = serde_json::to_string(&response)
                    .map_err(|err| ToolError::internal(err.to_string()))?;
                writer.write_all(payload.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }
}

pub async fn run_stdio() -> Result<(), ToolError> {
    let app = App::initialize(PlatformConfig::from_env()).await?;
    app.logger.info(
        "serving json-rpc on stdio",
        Some(&serde_json::json!({"tools": app.tool_executor.tool_names()})),
    );
    let server = RpcServer::new(Arc::new(app));
    server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
}
