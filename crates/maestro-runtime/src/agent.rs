//! A fully composed agent: chat client, tools, middleware, and optional
//! retrieval context, invocable inside a workflow graph or standalone.

use std::collections::HashSet;
use std::sync::Arc;

use maestro_core::event_data;
use maestro_core::{
    CancellationSignal, ChatMessage, EventBus, ToolExecutionContext, WorkerError, WorkerEventType,
    WorkerResult,
};
use maestro_providers::{ChatClient, ChatRequest, StreamChunk, Usage};
use maestro_rag::ContextProvider;
use maestro_tools::{HostedToolHandle, ToolRegistry};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::middleware::AgentMiddleware;

/// Per-invocation options.
#[derive(Default)]
pub struct AgentRunOptions {
    pub cancel: CancellationSignal,

    /// Receives model-output text deltas as they arrive.
    pub update_tx: Option<mpsc::Sender<StreamChunk>>,

    /// Extra function declarations advertised alongside the agent's tools.
    pub extra_tools: Vec<Value>,

    /// Tool names consumed by the caller instead of the registry; a call to
    /// one of these ends the loop with the call left on the last message.
    pub reserved_tool_names: HashSet<String>,
}

/// Outcome of a single agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRunResponse {
    /// Messages produced by this invocation (assistant and tool messages).
    pub messages: Vec<ChatMessage>,

    /// Structured value, when the agent produced one.
    pub value: Option<String>,

    pub usage: Usage,
}

impl AgentRunResponse {
    /// Text of the last assistant message.
    pub fn final_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == maestro_core::Role::Assistant)
            .map(|m| m.text.clone())
            .unwrap_or_default()
    }
}

/// A configured agent instance, valid for one workflow build.
pub struct AgentInstance {
    pub id: String,
    pub name: String,
    pub role: String,
    pub description: String,
    pub instructions: String,

    chat_client: Arc<dyn ChatClient>,
    tools: Arc<ToolRegistry>,
    tool_schemas: Vec<Value>,
    tool_names: Vec<String>,
    hosted_tools: Vec<HostedToolHandle>,
    middleware: Vec<Arc<dyn AgentMiddleware>>,
    context_provider: Option<Arc<dyn ContextProvider>>,
    bus: Arc<EventBus>,
    max_tool_iterations: u32,
}

impl std::fmt::Debug for AgentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentInstance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl AgentInstance {
    pub fn new(
        id: impl Into<String>,
        role: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
        chat_client: Arc<dyn ChatClient>,
        tools: Arc<ToolRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            role: role.into(),
            description: description.into(),
            instructions: instructions.into(),
            chat_client,
            tools,
            tool_schemas: Vec::new(),
            tool_names: Vec::new(),
            hosted_tools: Vec::new(),
            middleware: Vec::new(),
            context_provider: None,
            bus,
            max_tool_iterations: maestro_core::DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    pub fn with_tools(mut self, names: Vec<String>, schemas: Vec<Value>) -> Self {
        self.tool_names = names;
        self.tool_schemas = schemas;
        self
    }

    pub fn with_hosted_tools(mut self, handles: Vec<HostedToolHandle>) -> Self {
        self.hosted_tools = handles;
        self
    }

    pub fn with_middleware(mut self, middleware: Vec<Arc<dyn AgentMiddleware>>) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    pub fn with_max_tool_iterations(mut self, max: u32) -> Self {
        self.max_tool_iterations = max;
        self
    }

    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    pub fn hosted_tools(&self) -> &[HostedToolHandle] {
        &self.hosted_tools
    }

    /// Run the agent over a conversation.
    ///
    /// The model is called in a loop: tool calls are executed through the
    /// registry and fed back until the model answers with text, a reserved
    /// tool is called, or the tool-iteration budget runs out.
    pub async fn run(
        &self,
        conversation: &[ChatMessage],
        options: AgentRunOptions,
    ) -> WorkerResult<AgentRunResponse> {
        let mut inbound: Vec<ChatMessage> = conversation.to_vec();
        for middleware in &self.middleware {
            middleware.on_invoking(&mut inbound);
        }

        let mut request_messages = vec![ChatMessage::system(self.instructions.clone())];
        if let Some(provider) = &self.context_provider {
            if options.cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }
            let context = provider.invoking(&inbound).await?;
            request_messages.extend(context.messages);
        }
        request_messages.extend(inbound.iter().cloned());

        let input_text = inbound.last().map(|m| m.text.clone()).unwrap_or_default();
        self.bus.emit_simple(
            WorkerEventType::AgentRunStart,
            event_data! {
                "agent_name" => self.name,
                "agent_role" => self.role,
                "tools_count" => self.tool_names.len(),
                "input" => input_text,
            },
        );

        let mut tools = self.tool_schemas.clone();
        tools.extend(options.extra_tools.iter().cloned());

        let mut produced: Vec<ChatMessage> = Vec::new();
        let mut usage = Usage::default();
        let mut settled = false;

        for _ in 0..self.max_tool_iterations {
            if options.cancel.is_cancelled() {
                return Err(WorkerError::Cancelled);
            }

            let request = ChatRequest {
                messages: request_messages.clone(),
                tools: tools.clone(),
                temperature: None,
                max_tokens: None,
            };

            let response = match &options.update_tx {
                Some(tx) => self.chat_client.generate_stream(request, tx.clone()).await?,
                None => self.chat_client.generate(request).await?,
            };
            usage.input_tokens += response.usage.input_tokens;
            usage.output_tokens += response.usage.output_tokens;

            let mut assistant = response.message;
            assistant.author_name = Some(self.name.clone());
            request_messages.push(assistant.clone());
            produced.push(assistant.clone());

            if assistant.tool_calls.is_empty() {
                settled = true;
                break;
            }
            if assistant
                .tool_calls
                .iter()
                .any(|call| options.reserved_tool_names.contains(&call.name))
            {
                // The caller consumes this call (e.g. a handoff); stop here.
                settled = true;
                break;
            }

            for call in &assistant.tool_calls {
                if options.cancel.is_cancelled() {
                    return Err(WorkerError::Cancelled);
                }
                debug!(agent = %self.name, tool = %call.name, "Agent tool call");
                let context = ToolExecutionContext {
                    agent_name: Some(self.name.clone()),
                    ..Default::default()
                };
                let value = self
                    .tools
                    .invoke(&call.name, call.arguments.clone(), &context)
                    .await?;
                let text = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                let tool_message = ChatMessage::tool(call.id.clone(), text);
                request_messages.push(tool_message.clone());
                produced.push(tool_message);
            }
        }

        if !settled {
            return Err(WorkerError::budget(format!(
                "agent '{}' exceeded its tool-iteration budget ({})",
                self.name, self.max_tool_iterations
            )));
        }

        let response = AgentRunResponse {
            messages: produced,
            value: None,
            usage,
        };

        self.bus.emit_simple(
            WorkerEventType::AgentRunComplete,
            event_data! {"agent_name" => self.name, "result" => response.final_text()},
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use maestro_core::{ToolCall, ToolDefinition, ToolTransport};
    use maestro_providers::{ChatResponse, StopReason};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Client that requests one tool call, then answers with its result.
    #[derive(Debug)]
    struct ToolCallingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatClient for ToolCallingClient {
        async fn generate(&self, request: ChatRequest) -> WorkerResult<ChatResponse> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let mut message = ChatMessage::assistant("");
                message.tool_calls.push(ToolCall {
                    id: "call_1".into(),
                    name: "double".into(),
                    arguments: serde_json::json!({"x": 21}),
                });
                Ok(ChatResponse {
                    message,
                    usage: Usage::default(),
                    stop_reason: StopReason::ToolUse,
                })
            } else {
                let tool_output = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == maestro_core::Role::Tool)
                    .map(|m| m.text.clone())
                    .unwrap_or_default();
                Ok(ChatResponse::text(format!("answer: {}", tool_output)))
            }
        }

        fn model_id(&self) -> &str {
            "tool-caller"
        }
    }

    fn agent_with(client: Arc<dyn ChatClient>) -> (AgentInstance, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let tools = Arc::new(ToolRegistry::new(Arc::clone(&bus)));
        tools.local_adapter().register_sync("tools.double", |args| {
            let x = args["x"].as_i64().unwrap_or(0);
            Ok(serde_json::json!(x * 2))
        });
        tools
            .register(ToolDefinition::new(
                "double",
                "Double a number",
                ToolTransport::Local,
                "tools.double",
            ))
            .unwrap();

        let schemas = vec![tools.get("double").unwrap().to_function_schema()];
        let agent = AgentInstance::new(
            "calc",
            "Calculator",
            "Participant ID: calc. Role/Description: Calculator",
            "You compute.",
            client,
            tools,
            Arc::clone(&bus),
        )
        .with_tools(vec!["double".to_string()], schemas);
        (agent, bus)
    }

    #[tokio::test]
    async fn test_tool_loop_round_trip() {
        let (agent, _bus) = agent_with(Arc::new(ToolCallingClient {
            calls: AtomicUsize::new(0),
        }));

        let response = agent
            .run(&[ChatMessage::user("double 21")], AgentRunOptions::default())
            .await
            .unwrap();

        assert_eq!(response.final_text(), "answer: 42");
        // assistant(tool call) + tool result + assistant(answer)
        assert_eq!(response.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_agent_run_events_emitted() {
        let (agent, bus) = agent_with(Arc::new(ToolCallingClient {
            calls: AtomicUsize::new(0),
        }));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe(
                [
                    WorkerEventType::AgentRunStart,
                    WorkerEventType::AgentRunComplete,
                ],
                Arc::new(move |event: &maestro_core::WorkerEvent| {
                    seen.lock().unwrap().push(event.event_type);
                }),
            );
        }

        agent
            .run(&[ChatMessage::user("double 21")], AgentRunOptions::default())
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[
                WorkerEventType::AgentRunStart,
                WorkerEventType::AgentRunComplete
            ]
        );
    }

    #[tokio::test]
    async fn test_reserved_tool_stops_loop_without_execution() {
        let (agent, _bus) = agent_with(Arc::new(ToolCallingClient {
            calls: AtomicUsize::new(0),
        }));

        let mut reserved = HashSet::new();
        reserved.insert("double".to_string());
        let options = AgentRunOptions {
            reserved_tool_names: reserved,
            ..Default::default()
        };

        let response = agent.run(&[ChatMessage::user("go")], options).await.unwrap();
        // Loop stopped on the reserved call; it was not executed.
        assert_eq!(response.messages.len(), 1);
        assert_eq!(response.messages[0].tool_calls[0].name, "double");
    }

    #[tokio::test]
    async fn test_cancelled_before_model_call() {
        let (agent, _bus) = agent_with(Arc::new(ToolCallingClient {
            calls: AtomicUsize::new(0),
        }));

        let cancel = CancellationSignal::new();
        cancel.cancel();
        let options = AgentRunOptions {
            cancel,
            ..Default::default()
        };

        let err = agent
            .run(&[ChatMessage::user("go")], options)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Cancelled));
    }

    #[tokio::test]
    async fn test_stream_chunks_forwarded() {
        let (agent, _bus) = agent_with(Arc::new(ToolCallingClient {
            calls: AtomicUsize::new(0),
        }));

        let (tx, mut rx) = mpsc::channel(16);
        let options = AgentRunOptions {
            update_tx: Some(tx),
            ..Default::default()
        };

        let response = agent
            .run(&[ChatMessage::user("double 21")], options)
            .await
            .unwrap();

        drop(response);
        let mut chunks = String::new();
        while let Ok(chunk) = rx.try_recv() {
            chunks.push_str(&chunk.delta);
        }
        assert!(chunks.contains("answer: 42"));
    }
}
