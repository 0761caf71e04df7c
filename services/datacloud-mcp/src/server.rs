//! MCP server over stdio
//!
//! Newline-delimited JSON-RPC 2.0. Each request runs on its own task so a
//! slow query (or an interactive login) does not block `ping` or other
//! calls; a single writer task serializes responses onto stdout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::metrics::record_tool_call;
use crate::protocol::{
    CallToolParams, CallToolResult, INVALID_PARAMS, INVALID_REQUEST, JsonRpcRequest,
    JsonRpcResponse, METHOD_NOT_FOUND, PARSE_ERROR, RequestId, negotiate_version,
};
use crate::tools::ToolHandler;

pub const SERVER_NAME: &str = "datacloud-mcp";

/// How long in-flight requests may keep running after stdin closes.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

enum Incoming {
    Request(JsonRpcRequest),
    /// Notifications and client responses; never answered
    Ignored(String),
    Invalid(JsonRpcResponse),
}

/// Serve MCP requests from `reader` until EOF, writing responses to `writer`.
pub async fn serve<R, W>(tools: Arc<dyn ToolHandler>, reader: R, writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<JsonRpcResponse>(64);

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(response) = rx.recv().await {
            let mut line = match serde_json::to_vec(&response) {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "failed to serialize response");
                    continue;
                }
            };
            line.push(b'\n');
            writer.write_all(&line).await?;
            writer.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_message(line) {
            Incoming::Request(request) => {
                let tools = tools.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = handle_request(tools.as_ref(), request).await;
                    if tx.send(response).await.is_err() {
                        debug!("output closed, dropping response");
                    }
                });
            }
            Incoming::Ignored(method) => debug!(method = %method, "ignoring message"),
            Incoming::Invalid(response) => {
                if tx.send(response).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("stdin closed, draining in-flight requests");
    drop(tx);
    match tokio::time::timeout(DRAIN_TIMEOUT, writer_task).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(std::io::Error::other(e)),
        Err(_) => {
            warn!(
                timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "requests still running after drain timeout"
            );
            Ok(())
        }
    }
}

fn parse_message(line: &str) -> Incoming {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return Incoming::Invalid(JsonRpcResponse::error(
                None,
                PARSE_ERROR,
                format!("Parse error: {e}"),
            ));
        }
    };

    if value.get("method").is_none()
        && (value.get("result").is_some() || value.get("error").is_some())
    {
        return Incoming::Ignored("response".to_string());
    }

    let id = value
        .get("id")
        .cloned()
        .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
    match serde_json::from_value::<JsonRpcRequest>(value) {
        Ok(request) if request.jsonrpc != "2.0" => Incoming::Invalid(JsonRpcResponse::error(
            id,
            INVALID_REQUEST,
            "Invalid request: jsonrpc must be \"2.0\"",
        )),
        Ok(request) if request.id.is_none() => Incoming::Ignored(request.method),
        Ok(request) => Incoming::Request(request),
        Err(e) => Incoming::Invalid(JsonRpcResponse::error(
            id,
            INVALID_REQUEST,
            format!("Invalid request: {e}"),
        )),
    }
}

async fn handle_request(tools: &dyn ToolHandler, request: JsonRpcRequest) -> JsonRpcResponse {
    let Some(id) = request.id else {
        return JsonRpcResponse::error(None, INVALID_REQUEST, "Invalid request: missing id");
    };

    match request.method.as_str() {
        "initialize" => {
            let requested = request
                .params
                .as_ref()
                .and_then(|p| p.get("protocolVersion"))
                .and_then(Value::as_str);
            let version = negotiate_version(requested);
            info!(protocol_version = version, "client initialized");
            JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": version,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
        }
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => JsonRpcResponse::success(id, json!({ "tools": tools.definitions() })),
        "tools/call" => call_tool(tools, id, request.params).await,
        other => JsonRpcResponse::error(
            Some(id),
            METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        ),
    }
}

async fn call_tool(tools: &dyn ToolHandler, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
    let params: CallToolParams = match params.map(serde_json::from_value) {
        Some(Ok(params)) => params,
        Some(Err(e)) => {
            return JsonRpcResponse::error(Some(id), INVALID_PARAMS, format!("Invalid params: {e}"));
        }
        None => {
            return JsonRpcResponse::error(Some(id), INVALID_PARAMS, "Invalid params: missing params");
        }
    };

    let call_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();
    info!(call_id = %call_id, tool = %params.name, "tool call started");

    let outcome = tools
        .call(&params.name, params.arguments.unwrap_or(Value::Null))
        .await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(text) => {
            record_tool_call(&params.name, "ok", elapsed.as_secs_f64());
            info!(call_id = %call_id, tool = %params.name, duration_ms = elapsed.as_millis() as u64, "tool call completed");
            JsonRpcResponse::success(id, json!(CallToolResult::text(text)))
        }
        Err(e) if e.is_protocol_error() => {
            record_tool_call(&params.name, "invalid", elapsed.as_secs_f64());
            warn!(call_id = %call_id, tool = %params.name, error = %e, "rejected tool call");
            JsonRpcResponse::error(Some(id), INVALID_PARAMS, e.to_string())
        }
        Err(e) => {
            record_tool_call(&params.name, "tool_error", elapsed.as_secs_f64());
            warn!(call_id = %call_id, tool = %params.name, error = %e, duration_ms = elapsed.as_millis() as u64, "tool call failed");
            JsonRpcResponse::success(id, json!(CallToolResult::failure(e.to_string())))
        }
    }
}
