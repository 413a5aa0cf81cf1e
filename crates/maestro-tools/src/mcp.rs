//! Minimal MCP (Model Context Protocol) client.
//!
//! Speaks JSON-RPC 2.0 over stdio (newline-delimited) or HTTP. The adapter
//! caches one client per `(source, transport)` pair.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use maestro_core::{TransientErrorKind, WorkerError, WorkerResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// MCP transports.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    #[default]
    Stdio,
    Http,
    Sse,
    Websocket,
}

/// Server connection settings parsed from a tool's `mcp_config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(default)]
    pub transport: McpTransport,

    /// Command to spawn (stdio transport).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Endpoint URL (http/sse transports).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Remote tool name override; defaults to the definition name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

/// A tool advertised by an MCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Value,
}

enum ClientTransport {
    Stdio(StdioTransport),
    Http(HttpTransport),
}

struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    // Keeps the server process alive for the lifetime of the client.
    _child: Child,
}

struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

/// MCP client bound to a single server.
pub struct McpClient {
    transport: ClientTransport,
    next_id: AtomicU64,
}

impl McpClient {
    /// Spawn and connect to a stdio MCP server.
    pub fn stdio(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> WorkerResult<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                WorkerError::tool_transient(
                    format!("failed to spawn MCP server '{}': {}", command, e),
                    TransientErrorKind::Connection,
                )
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::tool("MCP server stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::tool("MCP server stdout unavailable"))?;

        Ok(Self {
            transport: ClientTransport::Stdio(StdioTransport {
                stdin: Mutex::new(stdin),
                stdout: Mutex::new(BufReader::new(stdout)),
                _child: child,
            }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Connect to an HTTP MCP endpoint.
    pub fn http(endpoint: impl Into<String>) -> Self {
        Self {
            transport: ClientTransport::Http(HttpTransport {
                client: reqwest::Client::new(),
                endpoint: endpoint.into(),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    async fn request(&self, method: &str, params: Value) -> WorkerResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = match &self.transport {
            ClientTransport::Stdio(stdio) => self.stdio_roundtrip(stdio, id, payload).await?,
            ClientTransport::Http(http) => self.http_roundtrip(http, payload).await?,
        };

        if let Some(error) = response.get("error") {
            return Err(WorkerError::tool(format!(
                "MCP error for '{}': {}",
                method, error
            )));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn stdio_roundtrip(
        &self,
        stdio: &StdioTransport,
        id: u64,
        payload: Value,
    ) -> WorkerResult<Value> {
        let line = format!("{}\n", payload);
        {
            let mut stdin = stdio.stdin.lock().await;
            stdin.write_all(line.as_bytes()).await.map_err(|e| {
                WorkerError::tool_transient(e.to_string(), TransientErrorKind::Connection)
            })?;
            stdin.flush().await.map_err(|e| {
                WorkerError::tool_transient(e.to_string(), TransientErrorKind::Connection)
            })?;
        }

        let mut stdout = stdio.stdout.lock().await;
        let mut buffer = String::new();
        loop {
            buffer.clear();
            let read = stdout.read_line(&mut buffer).await.map_err(|e| {
                WorkerError::tool_transient(e.to_string(), TransientErrorKind::Connection)
            })?;
            if read == 0 {
                return Err(WorkerError::tool_transient(
                    "MCP server closed its stdout",
                    TransientErrorKind::Connection,
                ));
            }

            let Ok(message) = serde_json::from_str::<Value>(buffer.trim()) else {
                warn!("Ignoring non-JSON line from MCP server");
                continue;
            };
            // Notifications carry no id; keep reading until our response.
            match message.get("id").and_then(|v| v.as_u64()) {
                Some(message_id) if message_id == id => return Ok(message),
                _ => continue,
            }
        }
    }

    async fn http_roundtrip(&self, http: &HttpTransport, payload: Value) -> WorkerResult<Value> {
        let response = http
            .client
            .post(&http.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    WorkerError::tool_transient(e.to_string(), TransientErrorKind::Timeout)
                } else {
                    WorkerError::tool_transient(e.to_string(), TransientErrorKind::Connection)
                }
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let message = format!("MCP endpoint returned HTTP {}", status);
            return Err(match status {
                429 => WorkerError::tool_transient(message, TransientErrorKind::RateLimited),
                500..=599 => {
                    WorkerError::tool_transient(message, TransientErrorKind::TransientStatus)
                }
                _ => WorkerError::tool(message),
            });
        }

        response
            .json()
            .await
            .map_err(|e| WorkerError::tool(format!("malformed MCP response: {}", e)))
    }

    /// Perform the MCP initialize handshake.
    pub async fn initialize(&self) -> WorkerResult<Value> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "maestro", "version": maestro_core::VERSION},
                }),
            )
            .await?;
        debug!("MCP server initialized");
        Ok(result)
    }

    /// List tools advertised by the server.
    pub async fn list_tools(&self) -> WorkerResult<Vec<McpToolInfo>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or_else(|| json!([]));
        serde_json::from_value(tools)
            .map_err(|e| WorkerError::tool(format!("malformed tools/list response: {}", e)))
    }

    /// Call a named tool.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> WorkerResult<Value> {
        let result = self
            .request("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;

        if result.get("isError").and_then(|v| v.as_bool()).unwrap_or(false) {
            return Err(WorkerError::tool(format!(
                "MCP tool '{}' reported an error: {}",
                name,
                flatten_content(&result)
            )));
        }

        // Prefer the concatenated text content when present.
        let text = flatten_content(&result);
        if text.is_empty() {
            Ok(result)
        } else {
            Ok(Value::String(text))
        }
    }
}

fn flatten_content(result: &Value) -> String {
    result
        .get("content")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}
