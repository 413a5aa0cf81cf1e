//! Concrete graph nodes: agent, human, dispatcher, and aggregator.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use maestro_core::{ChatMessage, ConfirmationMode, WorkerError, WorkerResult};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::agent::{AgentInstance, AgentRunOptions};
use maestro_providers::StreamChunk;
use crate::graph::{ExecutionContext, ExecutionEvent, Executor, ExecutorOutput, GraphMessage};
use crate::handlers::HumanInputHandler;

/// Graph node wrapping an agent invocation.
///
/// Model-output chunks are forwarded as `AgentRunUpdate` events. When handoff
/// targets are declared, a matching reserved tool call becomes a route
/// instead of a registry execution. A terminal node with no route yields the
/// conversation as the workflow output.
pub struct AgentExecutor {
    step_id: String,
    agent: Arc<AgentInstance>,
    /// Reserved tool name -> target step id.
    handoffs: HashMap<String, String>,
    terminal: bool,
}

impl AgentExecutor {
    pub fn new(step_id: impl Into<String>, agent: Arc<AgentInstance>) -> Self {
        Self {
            step_id: step_id.into(),
            agent,
            handoffs: HashMap::new(),
            terminal: false,
        }
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn with_handoffs(mut self, handoffs: HashMap<String, String>) -> Self {
        self.handoffs = handoffs;
        self
    }

    /// Function declaration advertised for one handoff target.
    pub fn handoff_tool_name(target: &str) -> String {
        format!("handoff_to_{}", target)
    }

    pub fn handoff_schema(target: &str, description: &str) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": Self::handoff_tool_name(target),
                "description": format!("Transfer the conversation to {}. {}", target, description),
                "parameters": {
                    "type": "object",
                    "properties": {
                        "reason": {
                            "type": "string",
                            "description": "Why control is transferred"
                        }
                    },
                    "required": [],
                },
            },
        })
    }

    pub fn agent(&self) -> &Arc<AgentInstance> {
        &self.agent
    }
}

#[async_trait]
impl Executor for AgentExecutor {
    fn id(&self) -> &str {
        &self.step_id
    }

    async fn execute(
        &self,
        input: GraphMessage,
        ctx: &ExecutionContext,
    ) -> WorkerResult<ExecutorOutput> {
        let mut conversation = input.conversation();

        // Forward streaming chunks as update events, attributed to this node.
        let (update_tx, mut update_rx) = mpsc::channel::<StreamChunk>(64);
        let events = ctx.event_sender();
        let executor_id = self.step_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(chunk) = update_rx.recv().await {
                let _ = events
                    .send(ExecutionEvent::AgentRunUpdate {
                        executor_id: executor_id.clone(),
                        chunk: chunk.delta,
                    })
                    .await;
            }
        });

        let options = AgentRunOptions {
            cancel: ctx.cancel.clone(),
            update_tx: Some(update_tx),
            extra_tools: self
                .handoffs
                .values()
                .map(|target| Self::handoff_schema(target, ""))
                .collect(),
            reserved_tool_names: self.handoffs.keys().cloned().collect(),
        };

        let result = self.agent.run(&conversation, options).await;
        // All chunks are flushed before this executor reports completion.
        let _ = forwarder.await;
        let response = result?;

        let route = response
            .messages
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .find_map(|call| self.handoffs.get(&call.name).cloned());
        if let Some(target) = &route {
            debug!(step = %self.step_id, target = %target, "Handoff selected");
        }

        conversation.extend(response.messages.iter().cloned());

        let data = json!({
            "value": response.value,
            "messages": response.messages,
        });

        let message = GraphMessage::Conversation(conversation);
        let mut out = ExecutorOutput::advance(message).with_data(data);
        if let Some(target) = route {
            out = out.with_route(target);
        } else if self.terminal {
            let output = out.message.to_value();
            out = out.with_output(output);
        }
        Ok(out)
    }
}

/// Human-in-the-loop node.
///
/// `auto` mode passes the conversation through unchanged; `cli` and
/// `structured` consult the configured handler, `structured` requiring the
/// reply to parse as JSON.
pub struct HumanExecutor {
    step_id: String,
    prompt: Option<String>,
    mode: ConfirmationMode,
    handler: Arc<dyn HumanInputHandler>,
}

impl HumanExecutor {
    pub fn new(
        step_id: impl Into<String>,
        prompt: Option<String>,
        mode: ConfirmationMode,
        handler: Arc<dyn HumanInputHandler>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            prompt,
            mode,
            handler,
        }
    }
}

#[async_trait]
impl Executor for HumanExecutor {
    fn id(&self) -> &str {
        &self.step_id
    }

    async fn execute(
        &self,
        input: GraphMessage,
        ctx: &ExecutionContext,
    ) -> WorkerResult<ExecutorOutput> {
        if ctx.cancel.is_cancelled() {
            return Err(WorkerError::Cancelled);
        }

        let mut conversation = input.conversation();
        if self.mode == ConfirmationMode::Auto {
            return Ok(ExecutorOutput::advance(GraphMessage::Conversation(conversation)));
        }

        let prompt = self
            .prompt
            .clone()
            .unwrap_or_else(|| "Provide input to continue:".to_string());
        let reply = self.handler.request_input(&self.step_id, &prompt).await?;

        if self.mode == ConfirmationMode::Structured && !reply.is_empty() {
            serde_json::from_str::<Value>(&reply).map_err(|e| {
                WorkerError::config(format!(
                    "structured input for step '{}' is not valid JSON: {}",
                    self.step_id, e
                ))
            })?;
        }

        if !reply.is_empty() {
            conversation.push(ChatMessage::user(reply));
        }
        Ok(ExecutorOutput::advance(GraphMessage::Conversation(conversation)))
    }
}

/// Fan-out entry node for parallel workflows; passes its input through.
pub struct DispatchExecutor {
    id: String,
}

impl DispatchExecutor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Executor for DispatchExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        input: GraphMessage,
        _ctx: &ExecutionContext,
    ) -> WorkerResult<ExecutorOutput> {
        Ok(ExecutorOutput::advance(input))
    }
}

/// Fan-in node: combines branch responses into a list, preserving the
/// declaration order of the branches.
pub struct AggregatorExecutor {
    id: String,
}

impl AggregatorExecutor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl Executor for AggregatorExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        input: GraphMessage,
        _ctx: &ExecutionContext,
    ) -> WorkerResult<ExecutorOutput> {
        let output = match &input {
            GraphMessage::Responses(branches) => Value::Array(
                branches
                    .iter()
                    .map(|branch| Value::String(last_assistant_text(&branch.conversation)))
                    .collect(),
            ),
            // A single-branch fan-out degenerates into a plain chain; still
            // present the result as a one-element list.
            GraphMessage::Conversation(conversation) => {
                Value::Array(vec![Value::String(last_assistant_text(conversation))])
            }
        };
        Ok(ExecutorOutput::advance(input).with_output(output))
    }
}

fn last_assistant_text(conversation: &[ChatMessage]) -> String {
    conversation
        .iter()
        .rev()
        .find(|m| m.role == maestro_core::Role::Assistant)
        .map(|m| m.text.clone())
        .unwrap_or_default()
}
