//! Parallel strategy: an input fan-out node, one branch per step, and a
//! fan-in aggregator that combines the branch outputs into a list in
//! declaration order.

use std::sync::Arc;

use maestro_core::{Severity, ValidationIssue, WorkerResult, WorkflowDefinition, WorkflowKind};

use super::{require_steps, Participant, StrategyContext, WorkflowStrategy};
use crate::executors::{AgentExecutor, AggregatorExecutor, DispatchExecutor, HumanExecutor};
use crate::graph::WorkflowGraph;

const DISPATCHER_ID: &str = "dispatcher";
const AGGREGATOR_ID: &str = "aggregator";

pub struct ParallelStrategy;

impl WorkflowStrategy for ParallelStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Parallel
    }

    fn validate(&self, workflow: &WorkflowDefinition) -> Vec<ValidationIssue> {
        let mut issues = require_steps(workflow);
        if workflow.steps.len() == 1 {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                field: "workflow.steps".into(),
                message: "parallel workflow with a single step gains nothing from fan-out".into(),
            });
        }
        issues
    }

    fn build(&self, ctx: &StrategyContext) -> WorkerResult<WorkflowGraph> {
        let name = ctx.config.name.clone().unwrap_or_else(|| "parallel".into());
        let mut graph = WorkflowGraph::new(name, DISPATCHER_ID);

        graph.add_executor(Arc::new(DispatchExecutor::new(DISPATCHER_ID)));
        graph.add_executor(Arc::new(AggregatorExecutor::new(AGGREGATOR_ID)));

        for (step, participant) in ctx.participants {
            match participant {
                Participant::Agent(agent) => {
                    graph.add_executor(Arc::new(AgentExecutor::new(&step.id, Arc::clone(agent))));
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
            graph.add_edge(DISPATCHER_ID, &step.id);
            graph.add_edge(&step.id, AGGREGATOR_ID);
        }

        Ok(graph)
    }
}
