//! Per-transport tool adapters.
//!
//! An adapter validates definitions for its transport and performs a single
//! execution attempt. Retry, timeout bookkeeping, and event emission live in
//! the registry, so adapters stay thin.

pub mod hosted;
pub mod http;
pub mod local;
pub mod mcp;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use maestro_core::{ToolDefinition, ToolExecutionContext, ToolTransport, WorkerError, WorkerResult};
use serde_json::Value;

pub use hosted::{HostedToolAdapter, HostedToolHandle};
pub use http::HttpToolAdapter;
pub use local::{LocalToolAdapter, LocalToolFn};
pub use mcp::McpToolAdapter;

/// Uniform single-attempt execution contract.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn transport(&self) -> ToolTransport;

    /// Validate a definition for this transport. Returns accumulated errors.
    fn validate(&self, definition: &ToolDefinition) -> Vec<String>;

    /// Perform one execution attempt.
    async fn execute(
        &self,
        definition: &ToolDefinition,
        arguments: Value,
        context: &ToolExecutionContext,
    ) -> WorkerResult<Value>;
}

/// Adapters indexed by transport.
///
/// Concrete handles to the local and hosted adapters are kept alongside the
/// trait objects: callers need them for static callable registration and
/// hosted-tool handles.
pub struct AdapterSet {
    adapters: HashMap<ToolTransport, Arc<dyn ToolAdapter>>,
    local: Arc<LocalToolAdapter>,
    hosted: Arc<HostedToolAdapter>,
}

impl AdapterSet {
    /// Set with the four built-in adapters installed.
    pub fn with_defaults() -> Self {
        let local = Arc::new(LocalToolAdapter::new());
        let hosted = Arc::new(HostedToolAdapter::new());
        let mut set = Self {
            adapters: HashMap::new(),
            local: Arc::clone(&local),
            hosted: Arc::clone(&hosted),
        };
        set.register(local);
        set.register(Arc::new(HttpToolAdapter::new()));
        set.register(hosted);
        set.register(Arc::new(McpToolAdapter::new()));
        set
    }

    pub fn local(&self) -> Arc<LocalToolAdapter> {
        Arc::clone(&self.local)
    }

    pub fn hosted(&self) -> Arc<HostedToolAdapter> {
        Arc::clone(&self.hosted)
    }

    /// Install (or replace) an adapter; custom adapters register here.
    pub fn register(&mut self, adapter: Arc<dyn ToolAdapter>) {
        self.adapters.insert(adapter.transport(), adapter);
    }

    pub fn get(&self, transport: ToolTransport) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.get(&transport).cloned()
    }

    pub fn get_or_err(&self, transport: ToolTransport) -> WorkerResult<Arc<dyn ToolAdapter>> {
        self.get(transport).ok_or_else(|| {
            WorkerError::tool_validation(format!("no adapter registered for transport {:?}", transport))
        })
    }
}
