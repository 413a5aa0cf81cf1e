//! Pluggable handlers for human input and plan review.

use async_trait::async_trait;
use maestro_core::{WorkerError, WorkerResult};
use tracing::warn;

/// Supplies input for human workflow steps.
#[async_trait]
pub trait HumanInputHandler: Send + Sync {
    async fn request_input(&self, step_id: &str, prompt: &str) -> WorkerResult<String>;
}

/// Default handler: contributes nothing and lets the flow continue.
pub struct AutoHumanInputHandler;

#[async_trait]
impl HumanInputHandler for AutoHumanInputHandler {
    async fn request_input(&self, step_id: &str, _prompt: &str) -> WorkerResult<String> {
        warn!(step = %step_id, "No human input handler configured; continuing without input");
        Ok(String::new())
    }
}

/// Reads one line from stdin (cli confirmation mode).
pub struct CliHumanInputHandler;

#[async_trait]
impl HumanInputHandler for CliHumanInputHandler {
    async fn request_input(&self, _step_id: &str, prompt: &str) -> WorkerResult<String> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            println!("{}", prompt);
            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .map_err(WorkerError::Io)?;
            Ok(line.trim_end().to_string())
        })
        .await
        .map_err(|e| WorkerError::tool(format!("stdin reader panicked: {}", e)))?
    }
}

/// Decision returned by a plan reviewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDecision {
    Approve,
    /// Reject with feedback; the manager regenerates the plan once.
    Revise(String),
}

/// External approver consulted when `enable_plan_review` is set.
#[async_trait]
pub trait PlanReviewHandler: Send + Sync {
    async fn review(&self, plan: &str) -> WorkerResult<PlanDecision>;
}

/// Default reviewer: approves every plan with a warning.
pub struct AutoApprovePlanReview;

#[async_trait]
impl PlanReviewHandler for AutoApprovePlanReview {
    async fn review(&self, _plan: &str) -> WorkerResult<PlanDecision> {
        warn!("No plan review handler configured; auto-approving plan");
        Ok(PlanDecision::Approve)
    }
}
