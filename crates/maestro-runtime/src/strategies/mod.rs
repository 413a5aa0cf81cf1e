//! Workflow strategies: per-kind builders that turn declared steps into an
//! executor graph.

pub mod group_chat;
pub mod handoff;
pub mod magentic;
pub mod parallel;
pub mod router;
pub mod sequential;

use std::collections::HashMap;
use std::sync::Arc;

use maestro_core::{
    EventBus, Severity, ValidationIssue, WorkerConfig, WorkerError, WorkerResult,
    WorkflowDefinition, WorkflowKind, WorkflowStep,
};
use parking_lot::RwLock;

use crate::agent::AgentInstance;
use crate::factory::AgentFactory;
use crate::graph::WorkflowGraph;
use crate::handlers::{HumanInputHandler, PlanReviewHandler};

pub use group_chat::GroupChatStrategy;
pub use handoff::HandoffStrategy;
pub use magentic::MagenticStrategy;
pub use parallel::ParallelStrategy;
pub use router::RouterStrategy;
pub use sequential::SequentialStrategy;

/// What a step resolves to after the factory pass.
pub enum Participant {
    Agent(Arc<AgentInstance>),
    Human(Arc<dyn HumanInputHandler>),
}

/// Everything a strategy needs to build its graph.
pub struct StrategyContext<'a> {
    pub config: &'a WorkerConfig,
    pub workflow: &'a WorkflowDefinition,
    /// Steps with their resolved participants, in declaration order.
    pub participants: &'a [(WorkflowStep, Participant)],
    pub factory: &'a AgentFactory,
    pub bus: Arc<EventBus>,
    pub plan_review: Arc<dyn PlanReviewHandler>,
}

impl<'a> StrategyContext<'a> {
    /// The agent bound to a step, when the step is an agent step.
    pub fn agent_of(&self, step_id: &str) -> Option<Arc<AgentInstance>> {
        self.participants.iter().find_map(|(step, participant)| {
            if step.id == step_id {
                match participant {
                    Participant::Agent(agent) => Some(Arc::clone(agent)),
                    Participant::Human(_) => None,
                }
            } else {
                None
            }
        })
    }
}

/// Per-workflow-kind graph builder.
pub trait WorkflowStrategy: Send + Sync {
    fn kind(&self) -> WorkflowKind;

    /// Strategy-specific validation; errors fail the build, warnings log.
    fn validate(&self, workflow: &WorkflowDefinition) -> Vec<ValidationIssue>;

    fn build(&self, ctx: &StrategyContext) -> WorkerResult<WorkflowGraph>;
}

/// Shared validation: every strategy needs at least one step.
pub(crate) fn require_steps(workflow: &WorkflowDefinition) -> Vec<ValidationIssue> {
    if workflow.steps.is_empty() {
        vec![ValidationIssue::error(
            "workflow.steps",
            "workflow must declare at least one step",
        )]
    } else {
        Vec::new()
    }
}

/// Registry of strategies, keyed by workflow kind.
pub struct StrategyRegistry {
    strategies: RwLock<HashMap<WorkflowKind, Arc<dyn WorkflowStrategy>>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the six canonical strategies installed.
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(SequentialStrategy));
        registry.register(Arc::new(ParallelStrategy));
        registry.register(Arc::new(GroupChatStrategy));
        registry.register(Arc::new(HandoffStrategy));
        registry.register(Arc::new(RouterStrategy));
        registry.register(Arc::new(MagenticStrategy));
        registry
    }

    pub fn register(&self, strategy: Arc<dyn WorkflowStrategy>) {
        self.strategies.write().insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: WorkflowKind) -> Option<Arc<dyn WorkflowStrategy>> {
        self.strategies.read().get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<WorkflowKind> {
        self.strategies.read().keys().copied().collect()
    }

    /// Validate a workflow against its strategy; errors fail, warnings log.
    pub fn validate_for_build(&self, workflow: &WorkflowDefinition) -> WorkerResult<()> {
        let strategy = self.get(workflow.kind).ok_or_else(|| {
            WorkerError::config(format!("unsupported workflow type '{}'", workflow.kind))
        })?;

        let issues = strategy.validate(workflow);
        let mut errors = Vec::new();
        for issue in issues {
            match issue.severity {
                Severity::Error => errors.push(issue.to_string()),
                Severity::Warning => tracing::warn!("{}", issue),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(WorkerError::config(errors.join("; ")))
        }
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_kind() {
        let registry = StrategyRegistry::with_defaults();
        for kind in [
            WorkflowKind::Sequential,
            WorkflowKind::Parallel,
            WorkflowKind::GroupChat,
            WorkflowKind::Handoff,
            WorkflowKind::Router,
            WorkflowKind::Magentic,
        ] {
            assert!(registry.get(kind).is_some(), "missing strategy for {}", kind);
        }
    }

    #[test]
    fn test_validate_for_build_rejects_empty_steps() {
        let registry = StrategyRegistry::with_defaults();
        let workflow = WorkflowDefinition {
            kind: WorkflowKind::Sequential,
            start_step: None,
            steps: Vec::new(),
            manager_model: None,
            manager_instructions: None,
            max_rounds: 10,
            max_stall: 3,
            termination_condition: None,
            enable_plan_review: false,
        };
        assert!(registry.validate_for_build(&workflow).is_err());
    }
}
