//! Sequential strategy: agents connected in declaration order, a growing
//! conversation flowing along the edges. The terminal step emits the
//! conversation as the final output.

use std::sync::Arc;

use maestro_core::{ValidationIssue, WorkerResult, WorkflowDefinition, WorkflowKind};

use super::{require_steps, Participant, StrategyContext, WorkflowStrategy};
use crate::executors::{AgentExecutor, HumanExecutor};
use crate::graph::WorkflowGraph;

pub struct SequentialStrategy;

impl WorkflowStrategy for SequentialStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Sequential
    }

    fn validate(&self, workflow: &WorkflowDefinition) -> Vec<ValidationIssue> {
        require_steps(workflow)
    }

    fn build(&self, ctx: &StrategyContext) -> WorkerResult<WorkflowGraph> {
        if ctx.participants.is_empty() {
            return Err(maestro_core::WorkerError::config(
                "sequential workflow requires at least one step",
            ));
        }

        let name = ctx.config.name.clone().unwrap_or_else(|| "sequential".into());
        let start = ctx.participants[0].0.id.clone();
        let mut graph = WorkflowGraph::new(name, start);

        let last_index = ctx.participants.len() - 1;
        for (index, (step, participant)) in ctx.participants.iter().enumerate() {
            match participant {
                Participant::Agent(agent) => {
                    let mut executor = AgentExecutor::new(&step.id, Arc::clone(agent));
                    if index == last_index {
                        executor = executor.terminal();
                    }
                    graph.add_executor(Arc::new(executor));
                }
                Participant::Human(handler) => {
                    graph.add_executor(Arc::new(HumanExecutor::new(
                        &step.id,
                        step.input_template.clone(),
                        ctx.config
                            .agent(step.agent.as_deref().unwrap_or(""))
                            .map(|a| a.confirmation_mode)
                            .unwrap_or_default(),
                        Arc::clone(handler),
                    )));
                }
            }
            if index < last_index {
                graph.add_edge(&step.id, &ctx.participants[index + 1].0.id);
            }
        }

        Ok(graph)
    }
}
