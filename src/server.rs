//! MCP Server: stdio transport, JSON-RPC 2.0, newline-delimited.
//!
//! Implements the Model Context Protocol (spec 2025-06-18) server over
//! stdin/stdout. Reads JSON-RPC requests from stdin (one per line) and
//! dispatches them to the tool dispatcher.
//!
//! Protocol flow:
//! 1. Client sends `initialize`, server responds with capabilities
//! 2. Client sends `notifications/initialized`
//! 3. Client sends `tools/list`, server returns tool definitions
//! 4. Client sends `tools/call`, server runs the tool as its own task
//! 5. Client may send `notifications/cancelled` for an in-flight call
//! 6. Client closes stdin, server cancels in-flight calls and exits
//!
//! Tool calls run concurrently, so responses may be written out of request
//! order. A single writer task owns stdout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::exec::reaper;
use crate::tools::ToolDispatcher;

/// Maximum size of a single JSON-RPC line (10 MiB).
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 types
// ---------------------------------------------------------------------------

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// MCP protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfo {
    name: String,
    version: String,
}

#[derive(Debug, Serialize)]
struct ServerCapabilities {
    tools: ToolsCapability,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolsCapability {
    list_changed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    capabilities: ServerCapabilities,
    server_info: ServerInfo,
}

/// MCP tool definition for tools/list.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ToolsListResult {
    tools: Vec<ToolDefinition>,
}

/// MCP tools/call params.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// MCP `notifications/cancelled` params.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelledParams {
    request_id: serde_json::Value,
    #[serde(default)]
    reason: Option<String>,
}

/// MCP content item in tools/call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text".to_owned(),
            text: text.into(),
        }
    }

    /// A text block carrying `value` as compact JSON.
    pub fn json(value: &impl Serialize) -> Self {
        match serde_json::to_string(value) {
            Ok(text) => Self::text(text),
            Err(e) => Self::text(format!(
                r#"{{"status":"error","message":"failed to serialize result: {e}"}}"#
            )),
        }
    }
}

/// MCP tools/call result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ContentItem>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

// ---------------------------------------------------------------------------
// MCP Server configuration
// ---------------------------------------------------------------------------

/// Configuration for the MCP server.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Default working directory for agent runs.
    pub workspace: PathBuf,
    pub bridge: BridgeConfig,
}

// ---------------------------------------------------------------------------
// Server main loop
// ---------------------------------------------------------------------------

/// In-flight `tools/call` requests, keyed by their JSON-RPC id.
type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn in_flight_key(id: &serde_json::Value) -> String {
    id.to_string()
}

/// Run the MCP server on stdin/stdout until stdin closes or Ctrl-C.
///
/// In-flight calls are cancelled on the way out, then any agent process
/// group still registered is killed.
pub async fn run_mcp_server(config: McpServerConfig) -> Result<()> {
    info!(
        workspace = %config.workspace.display(),
        sandbox = config.bridge.sandbox_enabled,
        default_adapter = config.bridge.default_adapter.as_str(),
        "oa-agent-bridge MCP server starting"
    );

    let dispatcher = Arc::new(ToolDispatcher::new(Arc::new(config.bridge), config.workspace));
    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            ctrl_c.cancel();
        }
    });

    let served = serve(
        dispatcher,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown,
    )
    .await;

    let reaped = reaper::reap_all();
    if reaped > 0 {
        warn!(reaped, "killed orphaned agent processes on shutdown");
    }
    info!("oa-agent-bridge MCP server stopped");
    served
}

/// Serve JSON-RPC over `reader`/`writer` until EOF or `shutdown`.
pub async fn serve<R, W>(
    dispatcher: Arc<ToolDispatcher>,
    mut reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_responses(writer, rx));
    let calls_root = CancellationToken::new();
    let in_flight = InFlight::default();
    let mut calls = JoinSet::new();
    let mut line_buf = Vec::new();
    let mut failure = None;

    loop {
        line_buf.clear();
        let read = tokio::select! {
            read = read_line_limited(&mut reader, &mut line_buf, MAX_LINE_BYTES) => read,
            () = shutdown.cancelled() => {
                info!("shutdown requested");
                break;
            }
        };
        while calls.try_join_next().is_some() {}

        let read = match read {
            Ok(read) => read,
            Err(e) => {
                failure = Some(anyhow::Error::new(e).context("failed to read from stdin"));
                break;
            }
        };
        match read {
            LineRead::Eof => {
                info!("stdin closed, shutting down");
                break;
            }
            LineRead::TooLong => {
                warn!(max_bytes = MAX_LINE_BYTES, "request line too long");
                let _ = tx.send(error_response(
                    None,
                    -32700,
                    &format!("parse error: line exceeds maximum size ({MAX_LINE_BYTES} bytes)"),
                ));
                continue;
            }
            LineRead::Line => {}
        }

        let text = String::from_utf8_lossy(&line_buf);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        debug!(raw = trimmed, "received request");

        let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "invalid JSON-RPC request");
                let _ = tx.send(error_response(None, -32700, &format!("parse error: {e}")));
                continue;
            }
        };

        if request.jsonrpc != "2.0" {
            warn!(version = request.jsonrpc, "invalid JSON-RPC version (expected \"2.0\")");
            let _ = tx.send(error_response(
                request.id.clone(),
                -32600,
                &format!(
                    "invalid request: jsonrpc version must be \"2.0\", got \"{}\"",
                    request.jsonrpc
                ),
            ));
            continue;
        }

        if request.method == "tools/call" {
            start_tool_call(&dispatcher, request, &calls_root, &in_flight, &tx, &mut calls);
            continue;
        }

        let is_notification = request.id.is_none();
        let response = dispatch(&dispatcher, &in_flight, &request);
        if is_notification {
            debug!(method = request.method, "notification handled (no response)");
            continue;
        }
        if let Some(resp) = response {
            let _ = tx.send(resp);
        }
    }

    if !calls.is_empty() {
        info!(in_flight = calls.len(), "cancelling in-flight tool calls");
    }
    calls_root.cancel();
    while calls.join_next().await.is_some() {}

    drop(tx);
    let written = writer_task.await.context("response writer task failed")?;
    match failure {
        Some(e) => Err(e),
        None => written,
    }
}

/// Spawn a `tools/call` request as its own task.
fn start_tool_call(
    dispatcher: &Arc<ToolDispatcher>,
    request: JsonRpcRequest,
    calls_root: &CancellationToken,
    in_flight: &InFlight,
    tx: &mpsc::UnboundedSender<JsonRpcResponse>,
    calls: &mut JoinSet<()>,
) {
    let params: ToolCallParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => {
            if request.id.is_some() {
                let _ = tx.send(error_response(
                    request.id,
                    -32602,
                    &format!("invalid tools/call params: {e}"),
                ));
            }
            return;
        }
    };

    let token = calls_root.child_token();
    if let Some(id) = &request.id {
        lock(in_flight).insert(in_flight_key(id), token.clone());
    }
    let dispatcher = Arc::clone(dispatcher);
    let in_flight = Arc::clone(in_flight);
    let tx = tx.clone();
    let id = request.id;
    calls.spawn(async move {
        let result = dispatcher.call_tool(&params.name, params.arguments, token).await;
        if let Some(id) = id {
            lock(&in_flight).remove(&in_flight_key(&id));
            let _ = tx.send(success_response(Some(id), &result));
        }
    });
}

fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Dispatch a non-`tools/call` request to its handler.
fn dispatch(dispatcher: &ToolDispatcher, in_flight: &InFlight, req: &JsonRpcRequest) -> Option<JsonRpcResponse> {
    match req.method.as_str() {
        "initialize" => Some(handle_initialize(req)),
        "notifications/initialized" => {
            info!("client initialized");
            None
        }
        "notifications/cancelled" => {
            handle_cancelled(in_flight, req);
            None
        }
        "tools/list" => Some(handle_tools_list(dispatcher, req)),
        "ping" => Some(handle_ping(req)),
        _ => {
            warn!(method = req.method, "unknown method");
            Some(error_response(
                req.id.clone(),
                -32601,
                &format!("method not found: {}", req.method),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_initialize(req: &JsonRpcRequest) -> JsonRpcResponse {
    let result = InitializeResult {
        protocol_version: "2025-06-18".to_owned(),
        capabilities: ServerCapabilities {
            tools: ToolsCapability {
                list_changed: false,
            },
        },
        server_info: ServerInfo {
            name: "oa-agent-bridge".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        },
    };

    success_response(req.id.clone(), &result)
}

fn handle_tools_list(dispatcher: &ToolDispatcher, req: &JsonRpcRequest) -> JsonRpcResponse {
    let result = ToolsListResult {
        tools: dispatcher.list_tools(),
    };
    success_response(req.id.clone(), &result)
}

fn handle_cancelled(in_flight: &InFlight, req: &JsonRpcRequest) {
    let params: CancelledParams = match serde_json::from_value(req.params.clone()) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "invalid notifications/cancelled params");
            return;
        }
    };
    match lock(in_flight).get(&in_flight_key(&params.request_id)) {
        Some(token) => {
            info!(request_id = %params.request_id, reason = params.reason.as_deref().unwrap_or(""), "cancelling tool call");
            token.cancel();
        }
        None => debug!(request_id = %params.request_id, "cancel for unknown or finished request"),
    }
}

fn handle_ping(req: &JsonRpcRequest) -> JsonRpcResponse {
    success_response(req.id.clone(), &serde_json::json!({}))
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn success_response(id: Option<serde_json::Value>, result: &impl Serialize) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(v) => JsonRpcResponse {
            jsonrpc: "2.0".to_owned(),
            id,
            result: Some(v),
            error: None,
        },
        Err(e) => {
            warn!(error = %e, "failed to serialize success response");
            JsonRpcResponse {
                jsonrpc: "2.0".to_owned(),
                id,
                result: None,
                error: Some(JsonRpcError {
                    code: -32603,
                    message: format!("internal error: failed to serialize result: {e}"),
                    data: None,
                }),
            }
        }
    }
}

fn error_response(id: Option<serde_json::Value>, code: i64, message: &str) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_owned(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message: message.to_owned(),
            data: None,
        }),
    }
}

/// Write each response as a single line, flushing after every one.
async fn write_responses<W>(mut out: W, mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(resp) = rx.recv().await {
        let mut json = serde_json::to_vec(&resp).context("failed to serialize response")?;
        debug!(bytes = json.len(), "sending response");
        json.push(b'\n');
        out.write_all(&json).await.context("failed to write to stdout")?;
        out.flush().await.context("failed to flush stdout")?;
    }
    Ok(())
}

/// Outcome of [`read_line_limited`].
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Eof,
    Line,
    /// The line was longer than the cap and has been discarded.
    TooLong,
}

/// Read a line from `reader` into `buf`, stopping at newline or `max_bytes`.
///
/// An over-long line is consumed through its newline and discarded so the
/// stream stays in sync.
async fn read_line_limited<R>(reader: &mut R, buf: &mut Vec<u8>, max_bytes: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    let mut total = 0usize;
    let mut too_long = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(match (too_long, total) {
                (true, _) => LineRead::TooLong,
                (false, 0) => LineRead::Eof,
                (false, _) => LineRead::Line,
            });
        }
        let (consumed, found_newline) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        if !too_long && total + consumed > max_bytes {
            too_long = true;
            buf.clear();
        }
        if !too_long {
            buf.extend_from_slice(&available[..consumed]);
        }
        total += consumed;
        reader.consume(consumed);
        if found_newline {
            return Ok(if too_long { LineRead::TooLong } else { LineRead::Line });
        }
    }
}
