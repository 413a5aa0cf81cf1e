//! Group-chat strategy: a synthesised manager selects the next speaker by
//! exact name each round. The loop ends when the termination condition
//! appears in the most recent message or `max_rounds` is reached.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use maestro_core::{
    ChatMessage, Severity, ValidationIssue, WorkerError, WorkerResult, WorkflowDefinition,
    WorkflowKind,
};
use tracing::{debug, warn};

use super::{require_steps, Participant, StrategyContext, WorkflowStrategy};
use crate::agent::{AgentInstance, AgentRunOptions};
use crate::executors::AgentExecutor;
use crate::graph::{ExecutionContext, Executor, ExecutorOutput, GraphMessage, WorkflowGraph};

pub(crate) const MANAGER_ID: &str = "manager";

const DEFAULT_MANAGER_INSTRUCTIONS: &str =
    "Select the next speaker based on the conversation context.";

pub struct GroupChatStrategy;

impl WorkflowStrategy for GroupChatStrategy {
    fn kind(&self) -> WorkflowKind {
        WorkflowKind::GroupChat
    }

    fn validate(&self, workflow: &WorkflowDefinition) -> Vec<ValidationIssue> {
        let mut issues = require_steps(workflow);

        if workflow.manager_model.is_none() {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                field: "workflow.manager_model".into(),
                message: "group chat without 'manager_model' falls back to the first agent's model"
                    .into(),
            });
        }
        if workflow.steps.len() < 2 {
            issues.push(ValidationIssue {
                severity: Severity::Warning,
                field: "workflow.steps".into(),
                message: "group chat works best with at least two participants".into(),
            });
        }

        issues
    }

    fn build(&self, ctx: &StrategyContext) -> WorkerResult<WorkflowGraph> {
        let manager = build_manager(ctx, DEFAULT_MANAGER_INSTRUCTIONS, "GroupManager")?;

        let mut participants = Vec::new();
        for (step, participant) in ctx.participants {
            let Participant::Agent(agent) = participant else {
                return Err(WorkerError::config(format!(
                    "group chat step '{}' must be an agent step",
                    step.id
                )));
            };
            participants.push(SpeakerEntry {
                name: agent.name.clone(),
                step_id: step.id.clone(),
                description: agent.description.clone(),
            });
        }

        let name = ctx.config.name.clone().unwrap_or_else(|| "group_chat".into());
        let mut graph = WorkflowGraph::new(name, MANAGER_ID);

        graph.add_executor(Arc::new(GroupChatManagerExecutor {
            id: MANAGER_ID.to_string(),
            manager,
            participants: participants.clone(),
            max_rounds: ctx.workflow.max_rounds,
            termination_condition: ctx.workflow.termination_condition.clone(),
            rounds: AtomicU32::new(0),
        }));

        for (step, participant) in ctx.participants {
            if let Participant::Agent(agent) = participant {
                graph.add_executor(Arc::new(AgentExecutor::new(&step.id, Arc::clone(agent))));
                graph.add_edge(&step.id, MANAGER_ID);
            }
        }

        // Generous budget: each round is one manager turn plus one speaker.
        graph.set_max_iterations((ctx.workflow.max_rounds + 2) * 2 + 2);

        Ok(graph)
    }
}

/// Synthesize the manager agent for group-chat and magentic workflows.
pub(crate) fn build_manager(
    ctx: &StrategyContext,
    default_instructions: &str,
    name: &str,
) -> WorkerResult<Arc<AgentInstance>> {
    let model_ref = match &ctx.workflow.manager_model {
        Some(model) => model.clone(),
        None => {
            let fallback = ctx
                .config
                .agents
                .first()
                .map(|a| a.model.clone())
                .ok_or_else(|| {
                    WorkerError::config("no manager model configured and no agents to fall back to")
                })?;
            warn!(model = %fallback, "Manager model not specified; using the first agent's model");
            fallback
        }
    };

    let base = ctx
        .workflow
        .manager_instructions
        .clone()
        .unwrap_or_else(|| default_instructions.to_string());
    let instructions = format!(
        "{}\nIMPORTANT: You must select the participant by their exact NAME \
         (the key in the list), not their description or role.",
        base
    );

    ctx.factory
        .create_manager_agent(&model_ref, &instructions, name)
        .map(Arc::new)
}

#[derive(Clone)]
pub(crate) struct SpeakerEntry {
    pub name: String,
    pub step_id: String,
    pub description: String,
}

/// Manager node: picks the next speaker or ends the chat.
struct GroupChatManagerExecutor {
    id: String,
    manager: Arc<AgentInstance>,
    participants: Vec<SpeakerEntry>,
    max_rounds: u32,
    termination_condition: Option<String>,
    rounds: AtomicU32,
}

impl GroupChatManagerExecutor {
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

    fn selection_prompt(&self) -> String {
        let roster: Vec<String> = self
            .participants
            .iter()
            .map(|p| format!("- {}: {}", p.name, p.description))
            .collect();
        format!(
            "Participants:\n{}\nRespond with the exact name of the next speaker and nothing else.",
            roster.join("\n")
        )
    }
}

#[async_trait]
impl Executor for GroupChatManagerExecutor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        input: GraphMessage,
        ctx: &ExecutionContext,
    ) -> WorkerResult<ExecutorOutput> {
        let conversation = input.conversation();
        let message = GraphMessage::Conversation(conversation.clone());

        if self.terminated(&conversation) {
            debug!("Termination condition met; ending group chat");
            let output = message.to_value();
            return Ok(ExecutorOutput::advance(message).with_output(output));
        }

        let round = self.rounds.fetch_add(1, Ordering::SeqCst);
        if round >= self.max_rounds {
            debug!(max_rounds = self.max_rounds, "Round budget reached; ending group chat");
            let output = message.to_value();
            return Ok(ExecutorOutput::advance(message).with_output(output));
        }

        let mut selection_input = conversation.clone();
        selection_input.push(ChatMessage::user(self.selection_prompt()));

        let options = AgentRunOptions {
            cancel: ctx.cancel.clone(),
            ..Default::default()
        };
        let response = self.manager.run(&selection_input, options).await?;
        let choice = response.final_text().trim().to_string();

        match self.participants.iter().find(|p| p.name == choice) {
            Some(speaker) => {
                debug!(round, speaker = %speaker.name, "Next speaker selected");
                Ok(ExecutorOutput::advance(message).with_route(speaker.step_id.clone()))
            }
            None => {
                warn!(choice = %choice, "Manager selection matched no participant; ending chat");
                let output = message.to_value();
                Ok(ExecutorOutput::advance(message).with_output(output))
            }
        }
    }
}
