//! Streaming aggregator: coalesces low-level execution events into
//! per-executor coherent messages at a configured verbosity.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::graph::ExecutionEvent;

/// Output verbosity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Only `workflow_output`.
    Minimal,
    /// Start/complete/output/status.
    #[default]
    Normal,
    /// Every event, including partial updates.
    Debug,
}

/// Message type of an aggregated message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamMessageType {
    ExecutorStart,
    ExecutorUpdate,
    ExecutorComplete,
    WorkflowOutput,
    WorkflowStatus,
}

/// UI-oriented aggregated message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessage {
    pub executor_id: Option<String>,
    pub content: String,
    pub is_complete: bool,
    pub event_type: StreamMessageType,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// Coalesces execution events into [`StreamMessage`]s.
///
/// Keeps one append buffer of text chunks per executor; the concatenation of
/// an executor's chunks equals the content of its completion message. The
/// aggregator is restartable via [`EventAggregator::clear`], and multiple
/// aggregators may coexist, each over its own stream.
pub struct EventAggregator {
    verbosity: Verbosity,
    buffers: HashMap<String, Vec<String>>,
    current_executor: Option<String>,
}

impl EventAggregator {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            buffers: HashMap::new(),
            current_executor: None,
        }
    }

    fn should_emit(&self, message_type: StreamMessageType) -> bool {
        match self.verbosity {
            Verbosity::Minimal => message_type == StreamMessageType::WorkflowOutput,
            Verbosity::Normal => matches!(
                message_type,
                StreamMessageType::ExecutorStart
                    | StreamMessageType::ExecutorComplete
                    | StreamMessageType::WorkflowOutput
                    | StreamMessageType::WorkflowStatus
            ),
            Verbosity::Debug => true,
        }
    }

    /// Process one event, possibly producing an aggregated message.
    pub fn handle(&mut self, event: &ExecutionEvent) -> Option<StreamMessage> {
        match event {
            ExecutionEvent::WorkflowStarted { .. } => self
                .should_emit(StreamMessageType::WorkflowStatus)
                .then(|| StreamMessage {
                    executor_id: None,
                    content: "Workflow iniciado".to_string(),
                    is_complete: true,
                    event_type: StreamMessageType::WorkflowStatus,
                    metadata: metadata([("state", Value::String("started".into()))]),
                }),

            ExecutionEvent::ExecutorInvoked { executor_id } => {
                self.current_executor = Some(executor_id.clone());
                self.buffers.insert(executor_id.clone(), Vec::new());

                self.should_emit(StreamMessageType::ExecutorStart)
                    .then(|| StreamMessage {
                        executor_id: Some(executor_id.clone()),
                        content: format!("Executor '{}' started", executor_id),
                        is_complete: false,
                        event_type: StreamMessageType::ExecutorStart,
                        metadata: metadata([(
                            "executor_id",
                            Value::String(executor_id.clone()),
                        )]),
                    })
            }

            ExecutionEvent::AgentRunUpdate { executor_id, chunk } => {
                let buffer = self.buffers.entry(executor_id.clone()).or_default();
                if !chunk.is_empty() {
                    buffer.push(chunk.clone());
                }

                self.should_emit(StreamMessageType::ExecutorUpdate)
                    .then(|| {
                        let buffer = self.buffers.get(executor_id).cloned().unwrap_or_default();
                        StreamMessage {
                            executor_id: Some(executor_id.clone()),
                            content: buffer.concat(),
                            is_complete: false,
                            event_type: StreamMessageType::ExecutorUpdate,
                            metadata: metadata([(
                                "chunk_count",
                                Value::from(buffer.len()),
                            )]),
                        }
                    })
            }

            ExecutionEvent::ExecutorCompleted { executor_id, .. } => {
                let buffer = self.buffers.remove(executor_id).unwrap_or_default();

                self.should_emit(StreamMessageType::ExecutorComplete)
                    .then(|| StreamMessage {
                        executor_id: Some(executor_id.clone()),
                        content: buffer.concat(),
                        is_complete: true,
                        event_type: StreamMessageType::ExecutorComplete,
                        metadata: metadata([
                            ("executor_id", Value::String(executor_id.clone())),
                            ("chunk_count", Value::from(buffer.len())),
                        ]),
                    })
            }

            ExecutionEvent::WorkflowOutput { executor_id, data } => self
                .should_emit(StreamMessageType::WorkflowOutput)
                .then(|| {
                    let content = match data {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    StreamMessage {
                        executor_id: executor_id.clone(),
                        content,
                        is_complete: true,
                        event_type: StreamMessageType::WorkflowOutput,
                        metadata: metadata([(
                            "source_executor_id",
                            executor_id
                                .clone()
                                .map(Value::String)
                                .unwrap_or(Value::Null),
                        )]),
                    }
                }),

            ExecutionEvent::WorkflowStatus { state } => self
                .should_emit(StreamMessageType::WorkflowStatus)
                .then(|| StreamMessage {
                    executor_id: None,
                    content: format!("Workflow status: {}", state),
                    is_complete: true,
                    event_type: StreamMessageType::WorkflowStatus,
                    metadata: metadata([("state", Value::String(state.to_string()))]),
                }),

            ExecutionEvent::WorkflowError { error, cancelled } => self
                .should_emit(StreamMessageType::WorkflowStatus)
                .then(|| StreamMessage {
                    executor_id: None,
                    content: format!("Workflow error: {}", error),
                    is_complete: true,
                    event_type: StreamMessageType::WorkflowStatus,
                    metadata: metadata([
                        ("state", Value::String("failed".into())),
                        ("cancelled", Value::Bool(*cancelled)),
                    ]),
                }),
        }
    }

    /// Drain an event stream into aggregated messages.
    pub async fn process_stream(
        &mut self,
        mut events: mpsc::Receiver<ExecutionEvent>,
        output: mpsc::Sender<StreamMessage>,
    ) {
        while let Some(event) = events.recv().await {
            if let Some(message) = self.handle(&event) {
                if output.send(message).await.is_err() {
                    break;
                }
            }
        }
    }

    /// Reset all aggregation state.
    pub fn clear(&mut self) {
        self.buffers.clear();
        self.current_executor = None;
    }

    pub fn current_executor(&self) -> Option<&str> {
        self.current_executor.as_deref()
    }
}

fn metadata<const N: usize>(entries: [(&str, Value); N]) -> HashMap<String, Value> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Console renderer over aggregated messages.
pub struct ConsoleStreamRenderer {
    show_metadata: bool,
}

impl ConsoleStreamRenderer {
    pub fn new(show_metadata: bool) -> Self {
        Self { show_metadata }
    }

    pub async fn render(&self, mut stream: mpsc::Receiver<StreamMessage>) {
        while let Some(message) = stream.recv().await {
            self.render_message(&message);
        }
    }

    fn render_message(&self, message: &StreamMessage) {
        let marker = match message.event_type {
            StreamMessageType::ExecutorStart => ">>",
            StreamMessageType::ExecutorUpdate => "..",
            StreamMessageType::ExecutorComplete => "ok",
            StreamMessageType::WorkflowOutput => "=>",
            StreamMessageType::WorkflowStatus => "--",
        };
        let executor = message
            .executor_id
            .as_deref()
            .map(|id| format!("[{}] ", id))
            .unwrap_or_default();
        println!("{} {}{}", marker, executor, message.content);
        if self.show_metadata && !message.metadata.is_empty() {
            println!("   {:?}", message.metadata);
        }
    }
}
