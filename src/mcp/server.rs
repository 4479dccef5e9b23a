//! JSON-RPC request loop
//!
//! Requests are read one line at a time. `tools/call` runs on its own task
//! so a long `speak` never holds up `get_loading_status`; every other
//! method is answered inline. A single writer task owns the output stream.

use super::{
    catalog, prompts, JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_NOT_FOUND, PARSE_ERROR, PROTOCOL_VERSION,
};
use crate::tools::VoiceTools;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

const SERVER_NAME: &str = "voice-mcp";

const INSTRUCTIONS: &str = "Text-to-speech through the 'speak' tool and system-wide hotkey \
dictation. Use get_loading_status to see whether the speech engines are ready.";

#[derive(Clone)]
pub struct McpServer {
    tools: Arc<VoiceTools>,
}

impl McpServer {
    pub fn new(tools: Arc<VoiceTools>) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &Arc<VoiceTools> {
        &self.tools
    }

    /// Serve requests from `reader` until it reaches end of input.
    ///
    /// Returns once every in-flight tool call has been answered.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let writer_task = tokio::spawn(write_responses(writer, rx));

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request = match parse_request(line) {
                Ok(request) => request,
                Err(response) => {
                    let _ = tx.send(*response);
                    continue;
                }
            };

            if request.method == "tools/call" {
                let server = self.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    if let Some(response) = server.handle_request(request).await {
                        let _ = tx.send(response);
                    }
                });
            } else if let Some(response) = self.handle_request(request).await {
                let _ = tx.send(response);
            }
        }

        tracing::info!("MCP client closed stdin");
        drop(tx);
        writer_task.await.map_err(std::io::Error::other)
    }

    /// Handle one raw line; None when no response is due
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match parse_request(line) {
            Ok(request) => self.handle_request(request).await,
            Err(response) => Some(*response),
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();
        let id = request.id.unwrap_or(Value::Null);

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, initialize_result()),
            "notifications/initialized" | "initialized" => {
                tracing::debug!("MCP client initialized");
                return None;
            }
            "notifications/cancelled" => {
                tracing::debug!("MCP request cancelled: {}", request.params);
                return None;
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": catalog::definitions() })),
            "tools/call" => self.call_tool(id, &request.params).await,
            "prompts/list" => {
                let prompts: Vec<Value> = prompts::all().iter().map(prompts::listing).collect();
                JsonRpcResponse::success(id, json!({ "prompts": prompts }))
            }
            "prompts/get" => get_prompt(id, &request.params),
            other => {
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Unknown method: {}", other))
            }
        };

        if is_notification {
            tracing::debug!("Dropping response to notification {}", request.method);
            return None;
        }
        Some(response)
    }

    async fn call_tool(&self, id: Value, params: &Value) -> JsonRpcResponse {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing tool name in params");
        };
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);

        tracing::debug!("Tool call: {}", name);
        match catalog::call(&self.tools, name, args).await {
            Ok(result) => match serde_json::to_value(&result) {
                Ok(value) => JsonRpcResponse::success(id, value),
                Err(e) => JsonRpcResponse::error(id, INVALID_PARAMS, e.to_string()),
            },
            Err(e) => JsonRpcResponse::error(id, INVALID_PARAMS, e.to_string()),
        }
    }
}

fn parse_request(line: &str) -> Result<JsonRpcRequest, Box<JsonRpcResponse>> {
    let request: JsonRpcRequest = serde_json::from_str(line).map_err(|e| {
        Box::new(JsonRpcResponse::error(
            Value::Null,
            PARSE_ERROR,
            format!("Invalid JSON: {}", e),
        ))
    })?;

    if request.jsonrpc != "2.0" {
        let id = request.id.clone().unwrap_or(Value::Null);
        return Err(Box::new(JsonRpcResponse::error(
            id,
            INVALID_REQUEST,
            "Invalid JSON-RPC version",
        )));
    }
    Ok(request)
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "listChanged": false },
            "prompts": { "listChanged": false }
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        },
        "instructions": INSTRUCTIONS
    })
}

fn get_prompt(id: Value, params: &Value) -> JsonRpcResponse {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    match prompts::find(name) {
        Some(prompt) => JsonRpcResponse::success(id, prompts::messages(prompt)),
        None => JsonRpcResponse::error(id, INVALID_PARAMS, format!("Unknown prompt: {}", name)),
    }
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<JsonRpcResponse>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = match serde_json::to_string(&response) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to serialize response: {}", e);
                continue;
            }
        };
        line.push('\n');

        if let Err(e) = writer.write_all(line.as_bytes()).await {
            tracing::error!("Failed to write response: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::error!("Failed to flush output: {}", e);
            break;
        }
    }
}
