//! Adapter for tools served by MCP servers.
//!
//! One client is opened lazily and cached per `(source, transport)` pair.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use maestro_core::{
    ToolDefinition, ToolExecutionContext, ToolTransport, TransientErrorKind, WorkerError,
    WorkerResult,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;

use super::ToolAdapter;
use crate::mcp::{McpClient, McpServerConfig, McpTransport};

pub struct McpToolAdapter {
    clients: Mutex<HashMap<(String, McpTransport), Arc<McpClient>>>,
}

impl McpToolAdapter {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn server_config(definition: &ToolDefinition) -> WorkerResult<McpServerConfig> {
        match &definition.mcp_config {
            Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| {
                WorkerError::tool_validation(format!(
                    "invalid mcp_config for tool '{}': {}",
                    definition.name, e
                ))
            }),
            None => Ok(McpServerConfig::default()),
        }
    }

    async fn client_for(
        &self,
        definition: &ToolDefinition,
        config: &McpServerConfig,
    ) -> WorkerResult<Arc<McpClient>> {
        let key = (definition.source.clone(), config.transport);

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client));
        }

        let client = match config.transport {
            McpTransport::Stdio => {
                let command = config.command.as_ref().ok_or_else(|| {
                    WorkerError::tool_validation("stdio MCP transport requires 'command'")
                })?;
                McpClient::stdio(command, &config.args, &config.env)?
            }
            // SSE servers accept the same request path as plain HTTP.
            McpTransport::Http | McpTransport::Sse => {
                let endpoint = config.endpoint.as_ref().ok_or_else(|| {
                    WorkerError::tool_validation("http/sse MCP transport requires 'endpoint'")
                })?;
                McpClient::http(endpoint.clone())
            }
            McpTransport::Websocket => {
                return Err(WorkerError::tool_validation(
                    "websocket MCP transport is not supported",
                ));
            }
        };

        client.initialize().await?;
        info!(source = %definition.source, transport = ?config.transport, "MCP server connected");

        let client = Arc::new(client);
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }
}

impl Default for McpToolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolAdapter for McpToolAdapter {
    fn transport(&self) -> ToolTransport {
        ToolTransport::Mcp
    }

    fn validate(&self, definition: &ToolDefinition) -> Vec<String> {
        let mut errors = Vec::new();

        if definition.source.trim().is_empty() {
            errors.push("MCP tool source must identify a server".to_string());
        }

        match Self::server_config(definition) {
            Ok(config) => match config.transport {
                McpTransport::Stdio => {
                    if config.command.is_none() {
                        errors.push("stdio MCP transport requires 'command'".to_string());
                    }
                }
                McpTransport::Http | McpTransport::Sse => {
                    if config.endpoint.is_none() {
                        errors.push(format!(
                            "{:?} MCP transport requires 'endpoint'",
                            config.transport
                        ));
                    }
                }
                McpTransport::Websocket => {
                    errors.push("websocket MCP transport is not supported".to_string());
                }
            },
            Err(e) => errors.push(e.to_string()),
        }

        errors
    }

    async fn execute(
        &self,
        definition: &ToolDefinition,
        arguments: Value,
        _context: &ToolExecutionContext,
    ) -> WorkerResult<Value> {
        let config = Self::server_config(definition)?;
        let client = self.client_for(definition, &config).await?;

        let tool_name = config.tool.as_deref().unwrap_or(&definition.name);
        let timeout = Duration::from_secs_f64(definition.timeout);

        match tokio::time::timeout(timeout, client.call_tool(tool_name, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::tool_transient(
                format!(
                    "MCP tool '{}' timed out after {:.1}s",
                    definition.name, definition.timeout
                ),
                TransientErrorKind::Timeout,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(mcp_config: Option<Value>) -> ToolDefinition {
        let mut def = ToolDefinition::new("remote_calc", "calc", ToolTransport::Mcp, "mcp://calc");
        def.mcp_config = mcp_config;
        def
    }

    #[test]
    fn test_validate_stdio_requires_command() {
        let adapter = McpToolAdapter::new();

        let errors = adapter.validate(&definition(Some(json!({"transport": "stdio"}))));
        assert!(errors.iter().any(|e| e.contains("command")));

        let errors = adapter.validate(&definition(Some(
            json!({"transport": "stdio", "command": "./server"}),
        )));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_validate_http_requires_endpoint() {
        let adapter = McpToolAdapter::new();

        let errors = adapter.validate(&definition(Some(json!({"transport": "http"}))));
        assert!(errors.iter().any(|e| e.contains("endpoint")));

        let errors = adapter.validate(&definition(Some(
            json!({"transport": "sse", "endpoint": "http://localhost:3000/mcp"}),
        )));
        assert!(errors.is_empty());
    }

    #[test]
    fn test_validate_websocket_rejected() {
        let adapter = McpToolAdapter::new();
        let errors = adapter.validate(&definition(Some(json!({"transport": "websocket"}))));
        assert!(errors.iter().any(|e| e.contains("websocket")));
    }
}
