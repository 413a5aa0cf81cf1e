//! Workflow engine: builds the strategy graph and drives its execution,
//! exposing blocking and streaming interfaces.

use std::sync::Arc;

use maestro_core::event_data;
use maestro_core::{
    CancellationSignal, StepKind, WorkerConfig, WorkerError, WorkerEventType, WorkerResult,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::factory::AgentFactory;
use crate::graph::{ExecutionEvent, WorkflowGraph};
use crate::handlers::{AutoApprovePlanReview, AutoHumanInputHandler, HumanInputHandler, PlanReviewHandler};
use crate::middleware::{AgentMiddleware, TemplateMiddleware};
use crate::runtime::Runtime;
use crate::strategies::{Participant, StrategyContext};

pub struct WorkflowEngine {
    config: Arc<WorkerConfig>,
    runtime: Arc<Runtime>,
    factory: AgentFactory,
    graph: Option<Arc<WorkflowGraph>>,
    cancel: CancellationSignal,
    human_handler: Arc<dyn HumanInputHandler>,
    plan_review: Arc<dyn PlanReviewHandler>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine").finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Validate the configuration and prepare an engine; the graph is built
    /// lazily on first run.
    pub fn new(config: WorkerConfig, runtime: Arc<Runtime>) -> WorkerResult<Self> {
        config.ensure_valid()?;
        let config = Arc::new(config);
        Ok(Self {
            factory: AgentFactory::new(Arc::clone(&config), Arc::clone(&runtime)),
            config,
            runtime,
            graph: None,
            cancel: CancellationSignal::new(),
            human_handler: Arc::new(AutoHumanInputHandler),
            plan_review: Arc::new(AutoApprovePlanReview),
        })
    }

    pub fn with_human_handler(mut self, handler: Arc<dyn HumanInputHandler>) -> Self {
        self.human_handler = handler;
        self
    }

    pub fn with_plan_review_handler(mut self, handler: Arc<dyn PlanReviewHandler>) -> Self {
        self.plan_review = handler;
        self
    }

    /// Signal observed before each executor dispatch and tool call.
    pub fn cancellation(&self) -> CancellationSignal {
        self.cancel.clone()
    }

    /// Resolve agents and delegate graph construction to the strategy.
    pub fn build(&mut self) -> WorkerResult<()> {
        if self.graph.is_some() {
            return Ok(());
        }

        let workflow = &self.config.workflow;
        self.runtime.strategies.validate_for_build(workflow)?;

        // Tools from resources are shared process-wide; later engines reuse
        // entries registered by earlier ones.
        for tool in &self.config.resources.tools {
            if !self.runtime.tools.exists(&tool.name) {
                self.runtime.tools.register(tool.clone())?;
            }
        }

        let mut participants = Vec::new();
        for step in &workflow.steps {
            let participant = match step.kind {
                StepKind::Agent => {
                    let agent_id = step.agent.as_ref().ok_or_else(|| {
                        WorkerError::config(format!("agent step '{}' missing 'agent'", step.id))
                    })?;
                    let step_middleware: Vec<Arc<dyn AgentMiddleware>> = step
                        .input_template
                        .as_ref()
                        .map(|template| {
                            vec![Arc::new(TemplateMiddleware::new(template.clone()))
                                as Arc<dyn AgentMiddleware>]
                        })
                        .unwrap_or_default();
                    Participant::Agent(Arc::new(
                        self.factory.create_agent(agent_id, step_middleware)?,
                    ))
                }
                StepKind::Human => Participant::Human(Arc::clone(&self.human_handler)),
            };
            participants.push((step.clone(), participant));
        }

        let strategy = self
            .runtime
            .strategies
            .get(workflow.kind)
            .ok_or_else(|| {
                WorkerError::config(format!("unsupported workflow type '{}'", workflow.kind))
            })?;

        let ctx = StrategyContext {
            config: &self.config,
            workflow,
            participants: &participants,
            factory: &self.factory,
            bus: Arc::clone(&self.runtime.bus),
            plan_review: Arc::clone(&self.plan_review),
        };

        let graph = strategy.build(&ctx)?;
        info!(
            workflow = %graph.name,
            kind = %workflow.kind,
            executors = graph.executor_ids().len(),
            "Workflow graph built"
        );
        self.graph = Some(Arc::new(graph));
        Ok(())
    }

    /// Run to completion and return the extracted final output.
    pub async fn run(&mut self, input: &str) -> WorkerResult<Value> {
        self.run_internal(input, None).await
    }

    /// Run while forwarding every execution event to `forward`.
    pub async fn run_stream(
        &mut self,
        input: &str,
        forward: mpsc::Sender<ExecutionEvent>,
    ) -> WorkerResult<Value> {
        self.run_internal(input, Some(forward)).await
    }

    async fn run_internal(
        &mut self,
        input: &str,
        forward: Option<mpsc::Sender<ExecutionEvent>>,
    ) -> WorkerResult<Value> {
        self.build()?;
        let graph = Arc::clone(self.graph.as_ref().expect("graph built above"));

        let (tx, mut rx) = mpsc::channel::<ExecutionEvent>(256);
        let cancel = self.cancel.clone();
        let task = tokio::spawn(graph.run_stream(input.to_string(), cancel, tx));

        let mut events = Vec::new();
        let mut error_reported = false;
        while let Some(event) = rx.recv().await {
            if matches!(event, ExecutionEvent::WorkflowError { .. }) {
                error_reported = true;
            }
            self.mirror_to_bus(&event);
            if let Some(forward) = &forward {
                let _ = forward.send(event.clone()).await;
            }
            events.push(event);
        }

        let result = task
            .await
            .map_err(|e| WorkerError::config(format!("workflow task panicked: {}", e)))?;

        match result {
            Ok(value) => {
                let output = extract_final_output(&events).unwrap_or(value);
                Ok(output)
            }
            Err(e) => {
                if !error_reported {
                    self.runtime.bus.emit_simple(
                        WorkerEventType::WorkflowError,
                        event_data! {
                            "error" => e.to_string(),
                            "cancelled" => matches!(e, WorkerError::Cancelled),
                        },
                    );
                }
                Err(e)
            }
        }
    }

    /// Mirror graph events onto the process-wide bus.
    fn mirror_to_bus(&self, event: &ExecutionEvent) {
        let bus = &self.runtime.bus;
        match event {
            ExecutionEvent::WorkflowStarted { workflow } => {
                bus.emit_simple(
                    WorkerEventType::WorkflowStart,
                    event_data! {"workflow" => workflow, "type" => self.config.workflow.kind.to_string()},
                );
            }
            ExecutionEvent::ExecutorInvoked { executor_id } => {
                bus.emit_simple(
                    WorkerEventType::AgentStart,
                    event_data! {"executor" => executor_id},
                );
            }
            ExecutionEvent::AgentRunUpdate { executor_id, chunk } => {
                bus.emit_simple(
                    WorkerEventType::AgentResponse,
                    event_data! {"executor" => executor_id, "chunk" => chunk},
                );
            }
            ExecutionEvent::ExecutorCompleted { executor_id, data } => {
                bus.emit_simple(
                    WorkerEventType::WorkflowStep,
                    event_data! {"step" => executor_id, "data" => data.clone()},
                );
            }
            ExecutionEvent::WorkflowOutput { data, .. } => {
                bus.emit_simple(
                    WorkerEventType::WorkflowComplete,
                    event_data! {"result" => data.clone()},
                );
            }
            // Completion and failure already reach the bus through the
            // output and error mappings.
            ExecutionEvent::WorkflowStatus { .. } => {}
            ExecutionEvent::WorkflowError { error, cancelled } => {
                bus.emit_simple(
                    WorkerEventType::WorkflowError,
                    event_data! {"error" => error, "cancelled" => *cancelled},
                );
            }
        }
    }
}

/// Final-output extraction, first non-empty rule wins:
/// 1. the last explicit output event;
/// 2. the last completion payload's `value`;
/// 3. the text of the last message in the last completion payload;
/// 4. a string rendering of the last event.
pub fn extract_final_output(events: &[ExecutionEvent]) -> Option<Value> {
    // Rule 1.
    if let Some(data) = events.iter().rev().find_map(|e| match e {
        ExecutionEvent::WorkflowOutput { data, .. } => Some(data.clone()),
        _ => None,
    }) {
        return Some(unwrap_message_output(data));
    }

    // Rules 2 and 3.
    if let Some(data) = events.iter().rev().find_map(|e| match e {
        ExecutionEvent::ExecutorCompleted { data: Some(data), .. } => Some(data.clone()),
        _ => None,
    }) {
        if let Some(value) = data.get("value").filter(|v| !v.is_null()) {
            return Some(value.clone());
        }
        if let Some(messages) = data.get("messages").and_then(|m| m.as_array()) {
            if let Some(text) = messages.last().and_then(|m| m.get("text")).and_then(|t| t.as_str())
            {
                return Some(Value::String(text.to_string()));
            }
        }
    }

    // Rule 4.
    events.last().map(|event| {
        debug!("No explicit output; falling back to the last event");
        Value::String(format!("{:?}", event))
    })
}

/// Collapse a message-list output into the text of its last message.
fn unwrap_message_output(data: Value) -> Value {
    match &data {
        Value::Array(items) => {
            if let Some(last) = items.last() {
                if let Some(text) = last.get("text").and_then(|t| t.as_str()) {
                    return Value::String(text.to_string());
                }
            }
            data
        }
        Value::Object(map) => map
            .get("text")
            .and_then(|t| t.as_str())
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(data),
        _ => data,
    }
}
