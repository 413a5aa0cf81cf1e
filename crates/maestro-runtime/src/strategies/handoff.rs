//! Handoff strategy: the start agent coordinates; each step's `transitions`
//! list becomes reserved handoff tools exposed to that agent. A handoff call
//! is consumed by the graph as a route; an invocation with no handoff ends
//! the flow with the conversation as output.

use std::collections::HashMap;
use std::sync::Arc;

use maestro_core::{ValidationIssue, WorkerError, WorkerResult, WorkflowDefinition, WorkflowKind};

use super::{require_steps, Participant, StrategyContext, WorkflowStrategy};
use crate::executors::AgentExecutor;
use crate::graph::WorkflowGraph;

pub struct HandoffStrategy;

impl WorkflowStrategy for HandoffStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Handoff
    }

    fn validate(&self, workflow: &WorkflowDefinition) -> Vec<ValidationIssue> {
        let mut issues = require_steps(workflow);

        if workflow.start_step.is_none() {
            issues.push(ValidationIssue::error(
                "workflow.start_step",
                "handoff workflow requires 'start_step' (the coordinator)",
            ));
        }

        let has_transitions = workflow
            .steps
            .iter()
            .any(|s| s.transitions.as_ref().map(|t| !t.is_empty()).unwrap_or(false));
        if !has_transitions {
            issues.push(ValidationIssue::error(
                "workflow.steps",
                "handoff workflow requires at least one transition",
            ));
        }

        for step in &workflow.steps {
            if let Some(transitions) = &step.transitions {
                for target in transitions {
                    if !workflow.steps.iter().any(|s| &s.id == target) {
                        issues.push(ValidationIssue::error(
                            format!("workflow.steps.{}.transitions", step.id),
                            format!("transition target '{}' is not declared in steps", target),
                        ));
                    }
                }
            }
        }

        issues
    }

    fn build(&self, ctx: &StrategyContext) -> WorkerResult<WorkflowGraph> {
        let start = ctx
            .workflow
            .start_step
            .clone()
            .ok_or_else(|| WorkerError::config("handoff workflow requires 'start_step'"))?;

        let name = ctx.config.name.clone().unwrap_or_else(|| "handoff".into());
        let mut graph = WorkflowGraph::new(name, start);

        for (step, participant) in ctx.participants {
            let Participant::Agent(agent) = participant else {
                return Err(WorkerError::config(format!(
                    "handoff step '{}' must be an agent step",
                    step.id
                )));
            };

            let handoffs: HashMap<String, String> = step
                .transitions
                .iter()
                .flatten()
                .map(|target| (AgentExecutor::handoff_tool_name(target), target.clone()))
                .collect();

            graph.add_executor(Arc::new(
                AgentExecutor::new(&step.id, Arc::clone(agent))
                    .terminal()
                    .with_handoffs(handoffs),
            ));
        }

        Ok(graph)
    }
}
