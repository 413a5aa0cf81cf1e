// Maestro Runtime - Workflow engine and orchestration strategies
//
// Turns a declarative configuration into a running, concurrent, event-
// producing pipeline: the agent factory composes agents, a strategy builds
// the executor graph, the engine drives it, and the aggregator shapes the
// event stream for consumers.

pub mod agent;
pub mod engine;
pub mod executors;
pub mod factory;
pub mod graph;
pub mod handlers;
pub mod middleware;
pub mod runner;
pub mod runtime;
pub mod strategies;
pub mod streaming;

pub use agent::{AgentInstance, AgentRunOptions, AgentRunResponse};
pub use engine::{extract_final_output, WorkflowEngine};
pub use executors::{AgentExecutor, AggregatorExecutor, DispatchExecutor, HumanExecutor};
pub use factory::AgentFactory;
pub use graph::{
    BranchResult, EdgeCondition, ExecutionContext, ExecutionEvent, Executor, ExecutorOutput,
    GraphMessage, GraphOptions, RunState, WorkflowGraph,
};
pub use handlers::{
    AutoApprovePlanReview, AutoHumanInputHandler, CliHumanInputHandler, HumanInputHandler,
    PlanDecision, PlanReviewHandler,
};
pub use middleware::{AgentMiddleware, EventEmitter, MessageSanitizer, TemplateMiddleware};
pub use runner::{AgentRunner, StandaloneAgentConfig};
pub use runtime::{Runtime, RuntimeBuilder};
pub use strategies::{
    GroupChatStrategy, HandoffStrategy, MagenticStrategy, ParallelStrategy, Participant,
    RouterStrategy, SequentialStrategy, StrategyContext, StrategyRegistry, WorkflowStrategy,
};
pub use streaming::{ConsoleStreamRenderer, EventAggregator, StreamMessage, StreamMessageType, Verbosity};
