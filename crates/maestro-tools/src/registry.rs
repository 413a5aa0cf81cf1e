//! Central tool registry.
//!
//! The registry validates definitions against their adapters at registration
//! time, drives the retry loop, and is the single place that emits
//! `TOOL_CALL_*` events: one `TOOL_CALL_START` per attempt, one
//! `TOOL_CALL_COMPLETE` on success, one `TOOL_CALL_ERROR` after the final
//! failed attempt. Adapters stay free of event plumbing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use maestro_core::event_data;
use maestro_core::{
    EventBus, RetryPolicy, ToolDefinition, ToolExecutionContext, ToolResult, WorkerError,
    WorkerEventType, WorkerResult,
};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::adapters::{AdapterSet, HostedToolHandle, LocalToolAdapter, ToolAdapter};

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolDefinition>>,
    adapters: AdapterSet,
    bus: Arc<EventBus>,
    invocation_counts: DashMap<String, u32>,
}

impl ToolRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            adapters: AdapterSet::with_defaults(),
            bus,
            invocation_counts: DashMap::new(),
        }
    }

    /// The local adapter, for registering in-process callables.
    pub fn local_adapter(&self) -> Arc<LocalToolAdapter> {
        self.adapters.local()
    }

    /// Register a custom adapter (transport `custom`, or replacing a default).
    pub fn register_adapter(&mut self, adapter: Arc<dyn ToolAdapter>) {
        self.adapters.register(adapter);
    }

    /// Register a tool definition, validating it against its adapter.
    pub fn register(&self, definition: ToolDefinition) -> WorkerResult<()> {
        if definition.name.trim().is_empty() {
            return Err(WorkerError::tool_validation("tool name must not be empty"));
        }
        if self.tools.read().contains_key(&definition.name) {
            return Err(WorkerError::tool_validation(format!(
                "tool already registered: {}",
                definition.name
            )));
        }

        let adapter = self.adapters.get_or_err(definition.transport)?;
        let errors = adapter.validate(&definition);
        if !errors.is_empty() {
            return Err(WorkerError::tool_validation(format!(
                "tool '{}' invalid: {}",
                definition.name,
                errors.join("; ")
            )));
        }

        info!(tool = %definition.name, transport = ?definition.transport, "Tool registered");
        self.tools.write().insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Register several tools, reporting per-name outcomes.
    pub fn register_many(&self, definitions: Vec<ToolDefinition>) -> HashMap<String, String> {
        let mut results = HashMap::new();
        for definition in definitions {
            let name = definition.name.clone();
            match self.register(definition) {
                Ok(()) => {
                    results.insert(name, "ok".to_string());
                }
                Err(e) => {
                    warn!(tool = %name, error = %e, "Tool registration failed");
                    results.insert(name, e.to_string());
                }
            }
        }
        results
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.read().get(name).cloned()
    }

    pub fn exists(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    pub fn clear(&self) {
        self.tools.write().clear();
        self.invocation_counts.clear();
    }

    /// Opaque handle for a hosted tool, for the agent factory.
    pub fn hosted_handle(&self, name: &str) -> WorkerResult<HostedToolHandle> {
        let definition = self
            .get(name)
            .ok_or_else(|| WorkerError::reference(format!("tool '{}' not found", name)))?;
        self.adapters.hosted().handle(&definition)
    }

    /// Execute a tool under its retry policy, returning a [`ToolResult`].
    pub async fn execute(
        &self,
        name: &str,
        arguments: Value,
        context: &ToolExecutionContext,
    ) -> ToolResult {
        let start = Instant::now();

        let Some(definition) = self.get(name) else {
            return ToolResult::error_result(name, format!("tool '{}' not found", name), 0.0, 0);
        };

        if !definition.enabled {
            return ToolResult::error_result(
                name,
                format!("tool '{}' is disabled", name),
                0.0,
                0,
            );
        }

        if let Some(limit) = definition.max_invocations {
            let count = *self
                .invocation_counts
                .entry(name.to_string())
                .and_modify(|c| *c += 1)
                .or_insert(1);
            if count > limit {
                return ToolResult::error_result(
                    name,
                    format!("tool '{}' exceeded max_invocations ({})", name, limit),
                    0.0,
                    0,
                );
            }
        }

        let adapter = match self.adapters.get_or_err(definition.transport) {
            Ok(adapter) => adapter,
            Err(e) => return ToolResult::error_result(name, e.to_string(), 0.0, 0),
        };

        let policy = definition.retry_policy.clone().unwrap_or_default();
        let mut attempts = 0;

        loop {
            attempts += 1;
            self.bus.emit_simple(
                WorkerEventType::ToolCallStart,
                event_data! {"tool" => name, "arguments" => arguments.clone()},
            );

            match adapter.execute(&definition, arguments.clone(), context).await {
                Ok(result) => {
                    let elapsed = start.elapsed().as_secs_f64();
                    debug!(tool = %name, attempts, elapsed, "Tool execution complete");
                    self.bus.emit_simple(
                        WorkerEventType::ToolCallComplete,
                        event_data! {"tool" => name, "result" => result.clone()},
                    );
                    return ToolResult::success_result(name, result, elapsed, attempts);
                }
                Err(e) => {
                    let retryable =
                        attempts < policy.max_attempts && e.is_retryable(&policy.retryable_errors);
                    if retryable {
                        let delay = policy.delay_for(attempts);
                        warn!(
                            tool = %name,
                            attempt = attempts,
                            delay_secs = delay.as_secs_f64(),
                            error = %e,
                            "Tool attempt failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let elapsed = start.elapsed().as_secs_f64();
                    warn!(tool = %name, attempts, error = %e, "Tool execution failed");
                    self.bus.emit_simple(
                        WorkerEventType::ToolCallError,
                        event_data! {"tool" => name, "error" => e.to_string()},
                    );
                    return ToolResult::error_result(name, e.to_string(), elapsed, attempts);
                }
            }
        }
    }

    /// Execute a tool, propagating the failure as an error.
    ///
    /// This is the entry point agents use; a failed result surfaces as a
    /// `tool_execution_failed` error after the retry budget is spent.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        context: &ToolExecutionContext,
    ) -> WorkerResult<Value> {
        let result = self.execute(name, arguments, context).await;
        if result.success {
            Ok(result.result.unwrap_or(Value::Null))
        } else {
            Err(WorkerError::tool(
                result
                    .error
                    .unwrap_or_else(|| format!("tool '{}' failed", name)),
            ))
        }
    }
}
