//! Adapter for statically registered in-process tools.
//!
//! Callables are registered up front under their dotted path; there is no
//! reflection at the engine boundary. Synchronous functions are dispatched to
//! the blocking pool so the scheduler thread stays responsive.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use maestro_core::{
    ToolDefinition, ToolExecutionContext, ToolTransport, TransientErrorKind, WorkerError,
    WorkerResult,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::ToolAdapter;

/// An async tool callable: JSON arguments in, JSON value out.
pub type LocalToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, WorkerResult<Value>> + Send + Sync>;

pub struct LocalToolAdapter {
    functions: RwLock<HashMap<String, LocalToolFn>>,
}

impl LocalToolAdapter {
    pub fn new() -> Self {
        Self {
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// Register an async callable under a dotted path.
    pub fn register_async<F, Fut>(&self, path: impl Into<String>, function: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = WorkerResult<Value>> + Send + 'static,
    {
        let path = normalize_path(&path.into());
        debug!(path = %path, "Local tool callable registered");
        self.functions
            .write()
            .insert(path, Arc::new(move |args| Box::pin(function(args))));
    }

    /// Register a synchronous callable; it runs on the blocking worker pool.
    pub fn register_sync<F>(&self, path: impl Into<String>, function: F)
    where
        F: Fn(Value) -> WorkerResult<Value> + Send + Sync + 'static,
    {
        let function = Arc::new(function);
        self.register_async(path, move |args| {
            let function = Arc::clone(&function);
            async move {
                tokio::task::spawn_blocking(move || (*function)(args))
                    .await
                    .map_err(|e| WorkerError::tool(format!("blocking tool panicked: {}", e)))?
            }
        });
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.functions.read().contains_key(&normalize_path(path))
    }

    fn resolve(&self, path: &str) -> WorkerResult<LocalToolFn> {
        self.functions
            .read()
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| {
                WorkerError::tool_validation(format!(
                    "no callable registered for local tool source '{}'",
                    path
                ))
            })
    }
}

impl Default for LocalToolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// Accept both "module:function" and "module.function" spellings.
fn normalize_path(path: &str) -> String {
    path.replace(':', ".")
}

#[async_trait]
impl ToolAdapter for LocalToolAdapter {
    fn transport(&self) -> ToolTransport {
        ToolTransport::Local
    }

    fn validate(&self, definition: &ToolDefinition) -> Vec<String> {
        let mut errors = Vec::new();
        let path = normalize_path(&definition.source);
        if path.is_empty() {
            errors.push("local tool source must not be empty".to_string());
            return errors;
        }
        let well_formed = path
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_'));
        if !well_formed {
            errors.push(format!(
                "local tool source must be a dotted path, got '{}'",
                definition.source
            ));
        }
        errors
    }

    async fn execute(
        &self,
        definition: &ToolDefinition,
        arguments: Value,
        _context: &ToolExecutionContext,
    ) -> WorkerResult<Value> {
        let function = self.resolve(&definition.source)?;
        let timeout = Duration::from_secs_f64(definition.timeout);

        match tokio::time::timeout(timeout, (*function)(arguments)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::tool_transient(
                format!("tool '{}' timed out after {:.1}s", definition.name, definition.timeout),
                TransientErrorKind::Timeout,
            )),
        }
    }
}
