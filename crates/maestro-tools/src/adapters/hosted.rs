//! Adapter for vendor-hosted tools (`hosted://<kind>`).
//!
//! Hosted tools execute inside the LLM call, not locally. The adapter hands
//! an opaque handle to the agent factory and rejects local execution.

use std::collections::HashMap;

use async_trait::async_trait;
use maestro_core::{
    HostedToolKind, ToolDefinition, ToolExecutionContext, ToolTransport, WorkerError, WorkerResult,
};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use super::ToolAdapter;

/// Opaque descriptor handed to the agent factory for hosted tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedToolHandle {
    pub name: String,
    pub kind: HostedToolKind,
    pub config: Option<String>,
}

pub struct HostedToolAdapter {
    handles: RwLock<HashMap<(String, HostedToolKind), HostedToolHandle>>,
}

impl HostedToolAdapter {
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(HashMap::new()),
        }
    }

    fn parse_kind(source: &str) -> WorkerResult<HostedToolKind> {
        source
            .strip_prefix("hosted://")
            .and_then(HostedToolKind::parse)
            .ok_or_else(|| {
                WorkerError::tool_validation(format!(
                    "hosted tool source must be hosted://<kind>, got '{}'",
                    source
                ))
            })
    }

    /// Resolve (and cache) the opaque handle for a hosted tool definition.
    pub fn handle(&self, definition: &ToolDefinition) -> WorkerResult<HostedToolHandle> {
        let kind = Self::parse_kind(&definition.source)?;
        let key = (definition.name.clone(), kind);

        if let Some(handle) = self.handles.read().get(&key) {
            return Ok(handle.clone());
        }

        let handle = HostedToolHandle {
            name: definition.name.clone(),
            kind,
            config: definition.hosted_config.as_ref().map(|c| c.to_string()),
        };
        debug!(tool = %definition.name, kind = ?kind, "Hosted tool handle created");
        self.handles.write().insert(key, handle.clone());
        Ok(handle)
    }
}

impl Default for HostedToolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolAdapter for HostedToolAdapter {
    fn transport(&self) -> ToolTransport {
        ToolTransport::Hosted
    }

    fn validate(&self, definition: &ToolDefinition) -> Vec<String> {
        match Self::parse_kind(&definition.source) {
            Ok(_) => Vec::new(),
            Err(e) => vec![e.to_string()],
        }
    }

    async fn execute(
        &self,
        definition: &ToolDefinition,
        _arguments: Value,
        _context: &ToolExecutionContext,
    ) -> WorkerResult<Value> {
        Err(WorkerError::tool(format!(
            "hosted tool '{}' is not locally executable; it runs during the LLM call",
            definition.name
        )))
    }
}
