// Maestro Core - Foundation types for the declarative multi-agent workflow runtime
//
// This crate provides the configuration model, error kinds, event bus, and
// chat/tool data types shared by every other crate in the workspace.

pub mod cancel;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod tool;

// Re-export core types
pub use cancel::CancellationSignal;
pub use config::{
    AgentDefinition, ConfirmationMode, KnowledgeConfig, ModelReference, ProviderKind, RagConfig,
    RagEmbeddingConfig, RagStrategy, ResourcesConfig, Severity, StepKind, ValidationIssue,
    WorkerConfig, WorkflowDefinition, WorkflowKind, WorkflowStep,
};
pub use error::{TransientErrorKind, WorkerError, WorkerResult};
pub use event::{EventBus, EventHandler, WorkerEvent, WorkerEventType};
pub use message::{last_text, ChatMessage, Role, ToolCall};
pub use tool::{
    ApprovalMode, HostedToolKind, ParameterType, RetryPolicy, ToolDefinition,
    ToolExecutionContext, ToolParameter, ToolResult, ToolTransport,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default cap on executor dispatches per workflow run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 100;

/// Default cap on model round-trips inside a single agent invocation.
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 10;
