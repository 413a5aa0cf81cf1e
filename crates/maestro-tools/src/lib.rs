// Maestro Tools - Tool registry and transport adapters
//
// Uniformly exposes a tool as `(arguments) -> ToolResult` over local
// callables, HTTP endpoints, hosted tools, and MCP servers. The registry is
// the single interposition point for retries and TOOL_CALL_* events.

pub mod adapters;
pub mod mcp;
pub mod registry;

pub use adapters::{
    AdapterSet, HostedToolAdapter, HostedToolHandle, HttpToolAdapter, LocalToolAdapter,
    LocalToolFn, McpToolAdapter, ToolAdapter,
};
pub use mcp::{McpClient, McpServerConfig, McpToolInfo, McpTransport};
pub use registry::ToolRegistry;
