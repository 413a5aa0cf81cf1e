//! Magentic strategy: a manager-driven orchestrator with a task ledger.
//!
//! The manager produces a plan (optionally paused for external review), then
//! selects speakers round by round while tracking progress. `max_stall`
//! consecutive unproductive rounds trigger one replanning pass; stalling
//! again after the replan escalates as an iteration-budget error.

use std::sync::Arc;

use async_trait::async_trait;
use maestro_core::event_data;
use maestro_core::{
    ChatMessage, EventBus, Severity, ValidationIssue, WorkerError, WorkerEventType, WorkerResult,
    WorkflowDefinition, WorkflowKind,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::group_chat::{build_manager, SpeakerEntry};
use super::{require_steps, Participant, StrategyContext, WorkflowStrategy};
use crate::agent::{AgentInstance, AgentRunOptions};
use crate::executors::AgentExecutor;
use crate::graph::{ExecutionContext, Executor, ExecutorOutput, GraphMessage, WorkflowGraph};
use crate::handlers::{PlanDecision, PlanReviewHandler};

const MANAGER_ID: &str = "magentic_manager";

const DEFAULT_MANAGER_INSTRUCTIONS: &str =
    "You coordinate a team of specialists. Analyze the task, keep a ledger of \
     facts and progress, and select the participant best suited to advance it.";

pub struct MagenticStrategy;

impl WorkflowStrategy for MagenticStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::Magentic
    }

    fn validate(&self, workflow: &WorkflowDefinition) -> Vec<ValidationIssue> {
        let mut issues = require_steps(workflow);

        if workflow.manager_model.is_none() {
            issues.push(ValidationIssue::error(
                "workflow.manager_model",
                "magentic workflow requires 'manager_model'",
            ));
        }
        if workflow.steps.len() < 2 {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                field: "workflow.steps".into(),
                message: "magentic orchestration is most useful with two or more specialists".into(),
            });
        }

        issues
    }

    fn build(&self, ctx: &StrategyContext) -> WorkerResult<WorkflowGraph> {
        let manager = build_manager(ctx, DEFAULT_MANAGER_INSTRUCTIONS, "MagenticManager")?;

        let mut participants = Vec::new();
        for (step, participant) in ctx.participants {
            let Participant::Agent(agent) = participant else {
                return Err(WorkerError::config(format!(
                    "magentic step '{}' must be an agent step",
                    step.id
                )));
            };
            participants.push(SpeakerEntry {
                name: agent.name.clone(),
                step_id: step.id.clone(),
                description: agent.description.clone(),
            });
        }

        let name = ctx.config.name.clone().unwrap_or_else(|| "magentic".into());
        let mut graph = WorkflowGraph::new(name, MANAGER_ID);

        graph.add_executor(Arc::new(MagenticManagerExecutor {
            id: MANAGER_ID.to_string(),
            manager,
            participants,
            max_rounds: ctx.workflow.max_rounds,
            max_stall: ctx.workflow.max_stall.max(1),
            termination_condition: ctx.workflow.termination_condition.clone(),
            enable_plan_review: ctx.workflow.enable_plan_review,
            plan_review: Arc::clone(&ctx.plan_review),
            bus: Arc::clone(&ctx.bus),
            ledger: Mutex::new(TaskLedger::default()),
        }));

        for (step, participant) in ctx.participants {
            if let Participant::Agent(agent) = participant {
                graph.add_executor(Arc::new(AgentExecutor::new(&step.id, Arc::clone(agent))));
                graph.add_edge(&step.id, MANAGER_ID);
            }
        }

        graph.set_max_iterations((ctx.workflow.max_rounds + 2) * 2 + 2);

        Ok(graph)
    }
}

/// Internal orchestration state.
#[derive(Default)]
struct TaskLedger {
    plan: Option<String>,
    rounds: u32,
    stall_count: u32,
    replanned: bool,
    last_response: Option<String>,
}

struct MagenticManagerExecutor {
    id: String,
    manager: Arc<AgentInstance>,
    participants: Vec<SpeakerEntry>,
    max_rounds: u32,
    max_stall: u32,
    termination_condition: Option<String>,
    enable_plan_review: bool,
    plan_review: Arc<dyn PlanReviewHandler>,
    bus: Arc<EventBus>,
    ledger: Mutex<TaskLedger>,
}

impl MagenticManagerExecutor {
    fn roster(&self) -> String {
        self.participants
            .iter()
            .map(|p| format!("- {}: {}", p.name, p.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn create_plan(
        &self,
        conversation: &[ChatMessage],
        ctx: &ExecutionContext,
        feedback: Option<&str>,
    ) -> WorkerResult<String> {
        let mut request = conversation.to_vec();
        let mut prompt = format!(
            "Analyze the task above. List the known facts, then produce a short \
             numbered plan assigning work to these participants:\n{}",
            self.roster()
        );
        if let Some(feedback) = feedback {
            prompt.push_str(&format!("\nReviewer feedback to incorporate: {}", feedback));
        }
        request.push(ChatMessage::user(prompt));

        let options = AgentRunOptions {
            cancel: ctx.cancel.clone(),
            ..Default::default()
        };
        let response = self.manager.run(&request, options).await?;
        Ok(response.final_text())
    }

    async fn reviewed_plan(
        &self,
        conversation: &[ChatMessage],
        ctx: &ExecutionContext,
    ) -> WorkerResult<String> {
        let mut plan = self.create_plan(conversation, ctx, None).await?;

        if self.enable_plan_review {
            self.bus.emit_simple(
                WorkerEventType::WorkflowStep,
                event_data! {"step" => self.id, "plan" => plan.clone()},
            );
            match self.plan_review.review(&plan).await? {
                PlanDecision::Approve => {}
                PlanDecision::Revise(feedback) => {
                    info!("Plan rejected by reviewer; regenerating with feedback");
                    plan = self.create_plan(conversation, ctx, Some(&feedback)).await?;
                }
            }
        }

        Ok(plan)
    }

    fn terminated(&self, conversation: &[ChatMessage]) -> bool {
        let Some(condition) = &self.termination_condition else {
            return false;
        };
        let condition = condition.to_lowercase();
        conversation
            .iter()
            .rev()
            .find(|m| !m.text.trim().is_empty())
            .map(|m| m.text.to_lowercase().contains(&condition))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Executor for MagenticManagerExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        input: GraphMessage,
        ctx: &ExecutionContext,
    ) -> WorkerResult<ExecutorOutput> {
        let mut conversation = input.conversation();
        let mut ledger = self.ledger.lock().await;

        if ledger.plan.is_none() {
            let plan = self.reviewed_plan(&conversation, ctx).await?;
            debug!("Task plan created");
            conversation.push(
                ChatMessage::assistant(format!("Plan:\n{}", plan)).with_author(&self.manager.name),
            );
            ledger.plan = Some(plan);
        }

        let message = GraphMessage::Conversation(conversation.clone());

        if self.terminated(&conversation) {
            let output = message.to_value();
            return Ok(ExecutorOutput::advance(message).with_output(output));
        }

        ledger.rounds += 1;
        if ledger.rounds > self.max_rounds {
            return Err(WorkerError::budget(format!(
                "magentic workflow exceeded max_rounds ({})",
                self.max_rounds
            )));
        }

        // Stall tracking: a speaker response identical to the previous one
        // (or empty) does not advance the task.
        let latest = conversation
            .iter()
            .rev()
            .find(|m| m.role == maestro_core::Role::Assistant)
            .map(|m| m.text.trim().to_string());
        if let Some(latest) = &latest {
            if latest.is_empty() || ledger.last_response.as_deref() == Some(latest.as_str()) {
                ledger.stall_count += 1;
            } else {
                ledger.stall_count = 0;
            }
            ledger.last_response = Some(latest.clone());
        }

        if ledger.stall_count >= self.max_stall {
            if ledger.replanned {
                return Err(WorkerError::budget(format!(
                    "magentic workflow stalled for {} consecutive rounds after replanning",
                    ledger.stall_count
                )));
            }
            warn!(stalls = ledger.stall_count, "Stall budget reached; replanning");
            let plan = self.create_plan(&conversation, ctx, None).await?;
            conversation.push(
                ChatMessage::assistant(format!("Revised plan:\n{}", plan))
                    .with_author(&self.manager.name),
            );
            ledger.plan = Some(plan);
            ledger.replanned = true;
            ledger.stall_count = 0;
        }

        let mut selection_input = conversation.clone();
        selection_input.push(ChatMessage::user(format!(
            "Given the plan and progress so far, select the next participant.\n{}\n\
             Respond with the exact name of the next speaker and nothing else.",
            self.roster()
        )));

        let options = AgentRunOptions {
            cancel: ctx.cancel.clone(),
            ..Default::default()
        };
        let response = self.manager.run(&selection_input, options).await?;
        let choice = response.final_text().trim().to_string();

        let message = GraphMessage::Conversation(conversation);
        match self.participants.iter().find(|p| p.name == choice) {
            Some(speaker) => Ok(ExecutorOutput::advance(message).with_route(speaker.step_id.clone())),
            None => {
                warn!(choice = %choice, "Manager selection matched no participant; ending run");
                let output = message.to_value();
                Ok(ExecutorOutput::advance(message).with_output(output))
            }
        }
    }
}
