//! Router strategy: the start agent classifies the input and its output text
//! is the id of the next step. Targets are attached as switch cases matching
//! `trim(lowercase(output)) == target_id`; the last declared target is the
//! default branch.

use std::sync::Arc;

use maestro_core::{ValidationIssue, WorkerResult, WorkerError, WorkflowDefinition, WorkflowKind};

use super::{require_steps, Participant, StrategyContext, WorkflowStrategy};
use crate::executors::{AgentExecutor, HumanExecutor};
use crate::graph::{EdgeCondition, WorkflowGraph};

pub struct RouterStrategy;

impl WorkflowStrategy for RouterStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Router
    }

    fn validate(&self, workflow: &WorkflowDefinition) -> Vec<ValidationIssue> {
        let mut issues = require_steps(workflow);

        match &workflow.start_step {
            None => issues.push(ValidationIssue::error(
                "workflow.start_step",
                "router workflow requires 'start_step' (the classifier)",
            )),
            Some(start) => {
                if !workflow.steps.iter().any(|s| &s.id == start) {
                    issues.push(ValidationIssue::error(
                        "workflow.start_step",
                        format!("start step '{}' is not declared in steps", start),
                    ));
                }
                if !workflow.steps.iter().any(|s| &s.id != start) {
                    issues.push(ValidationIssue::error(
                        "workflow.steps",
                        "router workflow requires at least one target step",
                    ));
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
            .ok_or_else(|| WorkerError::config("router workflow requires 'start_step'"))?;

        let name = ctx.config.name.clone().unwrap_or_else(|| "router".into());
        let mut graph = WorkflowGraph::new(name, start.clone());

        let classifier = ctx
            .agent_of(&start)
            .ok_or_else(|| WorkerError::config("router start step must be an agent step"))?;
        graph.add_executor(Arc::new(AgentExecutor::new(&start, classifier)));

        let targets: Vec<_> = ctx
            .participants
            .iter()
            .filter(|(step, _)| step.id != start)
            .collect();
        if targets.is_empty() {
            return Err(WorkerError::config(
                "router workflow requires at least one target step",
            ));
        }
        let last_index = targets.len() - 1;

        for (index, (step, participant)) in targets.iter().enumerate() {
            match participant {
                Participant::Agent(agent) => {
                    graph.add_executor(Arc::new(
                        AgentExecutor::new(&step.id, Arc::clone(agent)).terminal(),
                    ));
                }
                Participant::Human(handler) => {
                    graph.add_executor(Arc::new(HumanExecutor::new(
                        &step.id,
                        step.input_template.clone(),
                        Default::default(),
                        Arc::clone(handler),
                    )));
                }
            }

            // The last declared target doubles as the default branch.
            let condition = if index == last_index {
                EdgeCondition::Default
            } else {
                EdgeCondition::TextEquals(step.id.clone())
            };
            graph.add_conditional_edge(&start, &step.id, condition);
        }

        Ok(graph)
    }
}
