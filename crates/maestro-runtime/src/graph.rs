//! Executor graph and its streaming runner.
//!
//! A workflow is a directed graph of executors. The runner drives the graph
//! with one cooperative loop per run: sequential chains advance one node at a
//! time, multi-successor nodes fan out into concurrent tasks that are joined
//! before the common successor. Events stream through an mpsc channel in
//! emission order; parallel branches interleave without a global order, but
//! each branch's own events stay ordered.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use maestro_core::{CancellationSignal, ChatMessage, WorkerError, WorkerResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Coarse run state reported through status events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Started,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Started => "started",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Low-level events produced while a graph runs.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    WorkflowStarted {
        workflow: String,
    },
    ExecutorInvoked {
        executor_id: String,
    },
    /// Incremental model-output chunk attributed to an executor.
    AgentRunUpdate {
        executor_id: String,
        chunk: String,
    },
    ExecutorCompleted {
        executor_id: String,
        /// Completion payload (`{"value": ..., "messages": [...]}` for agents).
        data: Option<Value>,
    },
    WorkflowOutput {
        executor_id: Option<String>,
        data: Value,
    },
    WorkflowStatus {
        state: RunState,
    },
    WorkflowError {
        error: String,
        cancelled: bool,
    },
}

/// One branch's result after a fan-out.
#[derive(Debug, Clone)]
pub struct BranchResult {
    pub executor_id: String,
    pub conversation: Vec<ChatMessage>,
    pub data: Option<Value>,
}

/// The value flowing along graph edges.
#[derive(Debug, Clone)]
pub enum GraphMessage {
    /// A growing conversation (sequential flows).
    Conversation(Vec<ChatMessage>),
    /// Joined fan-out results, in declaration order.
    Responses(Vec<BranchResult>),
}

impl GraphMessage {
    pub fn conversation(&self) -> Vec<ChatMessage> {
        match self {
            GraphMessage::Conversation(messages) => messages.clone(),
            GraphMessage::Responses(branches) => branches
                .iter()
                .flat_map(|b| b.conversation.iter().cloned())
                .collect(),
        }
    }

    /// Text of the most recent message, used for routing decisions.
    pub fn text(&self) -> String {
        match self {
            GraphMessage::Conversation(messages) => messages
                .last()
                .map(|m| m.text.clone())
                .unwrap_or_default(),
            GraphMessage::Responses(branches) => branches
                .last()
                .and_then(|b| b.conversation.last())
                .map(|m| m.text.clone())
                .unwrap_or_default(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            GraphMessage::Conversation(messages) => {
                serde_json::to_value(messages).unwrap_or(Value::Null)
            }
            GraphMessage::Responses(branches) => Value::Array(
                branches
                    .iter()
                    .map(|b| {
                        Value::String(
                            b.conversation
                                .last()
                                .map(|m| m.text.clone())
                                .unwrap_or_default(),
                        )
                    })
                    .collect(),
            ),
        }
    }
}

/// Shared state handed to executors.
#[derive(Clone)]
pub struct ExecutionContext {
    pub cancel: CancellationSignal,
    events: mpsc::Sender<ExecutionEvent>,
}

impl ExecutionContext {
    pub fn new(cancel: CancellationSignal, events: mpsc::Sender<ExecutionEvent>) -> Self {
        Self { cancel, events }
    }

    pub async fn emit(&self, event: ExecutionEvent) {
        let _ = self.events.send(event).await;
    }

    pub fn event_sender(&self) -> mpsc::Sender<ExecutionEvent> {
        self.events.clone()
    }
}

/// What an executor hands back to the runner.
#[derive(Debug, Clone)]
pub struct ExecutorOutput {
    /// Value forwarded to successors.
    pub message: GraphMessage,

    /// Dynamic routing target, overriding static edges (handoff, group chat).
    pub route: Option<String>,

    /// Explicit terminal output; ends the run when set.
    pub output: Option<Value>,

    /// Completion payload surfaced in the `ExecutorCompleted` event.
    pub data: Option<Value>,
}

impl ExecutorOutput {
    pub fn advance(message: GraphMessage) -> Self {
        Self {
            message,
            route: None,
            output: None,
            data: None,
        }
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A node in the workflow graph: an agent or a synthetic node.
#[async_trait]
pub trait Executor: Send + Sync {
    fn id(&self) -> &str;

    async fn execute(
        &self,
        input: GraphMessage,
        ctx: &ExecutionContext,
    ) -> WorkerResult<ExecutorOutput>;
}

/// Condition attached to an edge.
#[derive(Debug, Clone)]
pub enum EdgeCondition {
    /// Matches when `trim(lowercase(output))` equals the value (lowercased).
    TextEquals(String),
    /// Always matches; declared last in a switch-case group.
    Default,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub target: String,
    pub condition: Option<EdgeCondition>,
}

/// Behavioural knobs for a graph run.
#[derive(Debug, Clone)]
pub struct GraphOptions {
    /// Global cap on executor dispatches.
    pub max_iterations: u32,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            max_iterations: maestro_core::DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Strategy-built graph of executors.
pub struct WorkflowGraph {
    pub name: String,
    start: String,
    executors: HashMap<String, Arc<dyn Executor>>,
    edges: HashMap<String, Vec<Edge>>,
    options: GraphOptions,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>, start: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: start.into(),
            executors: HashMap::new(),
            edges: HashMap::new(),
            options: GraphOptions::default(),
        }
    }

    pub fn add_executor(&mut self, executor: Arc<dyn Executor>) {
        self.executors.insert(executor.id().to_string(), executor);
    }

    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.edges.entry(source.into()).or_default().push(Edge {
            target: target.into(),
            condition: None,
        });
    }

    pub fn add_conditional_edge(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        condition: EdgeCondition,
    ) {
        self.edges.entry(source.into()).or_default().push(Edge {
            target: target.into(),
            condition: Some(condition),
        });
    }

    pub fn set_max_iterations(&mut self, max_iterations: u32) {
        self.options.max_iterations = max_iterations;
    }

    pub fn executor_ids(&self) -> Vec<&str> {
        self.executors.keys().map(String::as_str).collect()
    }

    fn node(&self, id: &str) -> WorkerResult<Arc<dyn Executor>> {
        self.executors
            .get(id)
            .cloned()
            .ok_or_else(|| WorkerError::reference(format!("executor '{}' not found in graph", id)))
    }

    /// Successors of `source` given the routing text of its output.
    fn resolve_successors(&self, source: &str, routing_text: &str) -> Vec<String> {
        let Some(edges) = self.edges.get(source) else {
            return Vec::new();
        };

        let has_conditions = edges.iter().any(|e| e.condition.is_some());
        if !has_conditions {
            return edges.iter().map(|e| e.target.clone()).collect();
        }

        let normalized = routing_text.trim().to_lowercase();
        for edge in edges {
            match &edge.condition {
                Some(EdgeCondition::TextEquals(expected)) => {
                    if normalized == expected.trim().to_lowercase() {
                        return vec![edge.target.clone()];
                    }
                }
                Some(EdgeCondition::Default) | None => return vec![edge.target.clone()],
            }
        }
        Vec::new()
    }

    /// Sole unconditional successor, used to locate a fan-in node.
    fn sole_successor(&self, source: &str) -> Option<String> {
        let edges = self.edges.get(source)?;
        match edges.as_slice() {
            [edge] if edge.condition.is_none() => Some(edge.target.clone()),
            _ => None,
        }
    }

    /// Run the graph, streaming events through `events`.
    ///
    /// The returned value is the final output (explicit executor output, or
    /// the flowing message when the graph simply runs off its last node).
    pub async fn run_stream(
        self: Arc<Self>,
        input: String,
        cancel: CancellationSignal,
        events: mpsc::Sender<ExecutionEvent>,
    ) -> WorkerResult<Value> {
        let ctx = ExecutionContext::new(cancel, events);

        ctx.emit(ExecutionEvent::WorkflowStarted {
            workflow: self.name.clone(),
        })
        .await;

        let mut current = self.start.clone();
        let mut message = GraphMessage::Conversation(vec![ChatMessage::user(input)]);
        let mut iterations: u32 = 0;

        loop {
            if ctx.cancel.is_cancelled() {
                ctx.emit(ExecutionEvent::WorkflowError {
                    error: "execution cancelled".to_string(),
                    cancelled: true,
                })
                .await;
                return Err(WorkerError::Cancelled);
            }

            iterations += 1;
            if iterations > self.options.max_iterations {
                return self
                    .fail(
                        &ctx,
                        WorkerError::budget(format!(
                            "workflow exceeded max_iterations ({})",
                            self.options.max_iterations
                        )),
                    )
                    .await;
            }

            let node = match self.node(&current) {
                Ok(node) => node,
                Err(e) => return self.fail(&ctx, e).await,
            };

            debug!(executor = %current, "Dispatching executor");
            ctx.emit(ExecutionEvent::ExecutorInvoked {
                executor_id: current.clone(),
            })
            .await;

            let out = match node.execute(message.clone(), &ctx).await {
                Ok(out) => out,
                Err(e) => return self.fail(&ctx, e).await,
            };

            ctx.emit(ExecutionEvent::ExecutorCompleted {
                executor_id: current.clone(),
                data: out.data.clone(),
            })
            .await;

            if let Some(output) = out.output {
                return self.finish(&ctx, Some(current), output).await;
            }

            let successors = match &out.route {
                Some(route) => {
                    if !self.executors.contains_key(route) {
                        return self
                            .fail(
                                &ctx,
                                WorkerError::reference(format!(
                                    "executor '{}' routed to unknown target '{}'",
                                    current, route
                                )),
                            )
                            .await;
                    }
                    vec![route.clone()]
                }
                None => self.resolve_successors(&current, &out.message.text()),
            };

            match successors.len() {
                0 => {
                    // Ran off the end of the graph: the flowing value is the output.
                    let output = out.message.to_value();
                    return self.finish(&ctx, Some(current), output).await;
                }
                1 => {
                    message = out.message;
                    current = successors.into_iter().next().expect("len checked");
                }
                _ => {
                    match self
                        .run_parallel(&ctx, &current, successors, out.message, &mut iterations)
                        .await
                    {
                        Ok((join, joined)) => {
                            message = joined;
                            current = join;
                        }
                        Err(e) => return self.fail(&ctx, e).await,
                    }
                }
            }
        }
    }

    /// Fan out `input` to `branches` concurrently and join at their common
    /// successor. Branch results are ordered by declaration, not completion.
    async fn run_parallel(
        self: &Arc<Self>,
        ctx: &ExecutionContext,
        source: &str,
        branches: Vec<String>,
        input: GraphMessage,
        iterations: &mut u32,
    ) -> WorkerResult<(String, GraphMessage)> {
        if ctx.cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }

        let join = self.sole_successor(&branches[0]).ok_or_else(|| {
            WorkerError::config(format!(
                "parallel branch '{}' has no join successor",
                branches[0]
            ))
        })?;
        for branch in &branches {
            let successor = self.sole_successor(branch);
            if successor.as_deref() != Some(join.as_str()) {
                return Err(WorkerError::config(format!(
                    "parallel branches disagree on their join node ('{}' vs '{:?}')",
                    join, successor
                )));
            }
        }

        *iterations += branches.len() as u32;
        if *iterations > self.options.max_iterations {
            return Err(WorkerError::budget(format!(
                "workflow exceeded max_iterations ({})",
                self.options.max_iterations
            )));
        }

        debug!(source = %source, branches = branches.len(), join = %join, "Fanning out");

        let mut handles = Vec::with_capacity(branches.len());
        for branch_id in branches {
            let node = self.node(&branch_id)?;
            let branch_ctx = ctx.clone();
            let branch_input = input.clone();
            handles.push(tokio::spawn(async move {
                branch_ctx
                    .emit(ExecutionEvent::ExecutorInvoked {
                        executor_id: branch_id.clone(),
                    })
                    .await;
                let result = node.execute(branch_input, &branch_ctx).await;
                if let Ok(out) = &result {
                    branch_ctx
                        .emit(ExecutionEvent::ExecutorCompleted {
                            executor_id: branch_id.clone(),
                            data: out.data.clone(),
                        })
                        .await;
                }
                (branch_id, result)
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let (branch_id, result) = handle
                .await
                .map_err(|e| WorkerError::config(format!("parallel branch panicked: {}", e)))?;
            let out = result?;
            results.push(BranchResult {
                executor_id: branch_id,
                conversation: out.message.conversation(),
                data: out.data,
            });
        }

        Ok((join, GraphMessage::Responses(results)))
    }

    async fn finish(
        &self,
        ctx: &ExecutionContext,
        executor_id: Option<String>,
        output: Value,
    ) -> WorkerResult<Value> {
        ctx.emit(ExecutionEvent::WorkflowOutput {
            executor_id,
            data: output.clone(),
        })
        .await;
        ctx.emit(ExecutionEvent::WorkflowStatus {
            state: RunState::Completed,
        })
        .await;
        Ok(output)
    }

    async fn fail(&self, ctx: &ExecutionContext, error: WorkerError) -> WorkerResult<Value> {
        warn!(workflow = %self.name, error = %error, "Workflow failed");
        ctx.emit(ExecutionEvent::WorkflowError {
            error: error.to_string(),
            cancelled: matches!(error, WorkerError::Cancelled),
        })
        .await;
        Err(error)
    }
}
