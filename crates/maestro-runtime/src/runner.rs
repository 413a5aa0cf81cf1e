//! Standalone agent runner: wraps a single agent in a one-step sequential
//! workflow so the engine's event and extraction semantics apply unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use maestro_core::{
    AgentDefinition, ConfirmationMode, KnowledgeConfig, ModelReference, ProviderKind, RagConfig,
    ResourcesConfig, StepKind, ToolDefinition, WorkerConfig, WorkerResult, WorkflowDefinition,
    WorkflowKind, WorkflowStep,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::WorkflowEngine;
use crate::graph::ExecutionEvent;
use crate::runtime::Runtime;

/// Configuration for a standalone agent.
#[derive(Debug, Clone)]
pub struct StandaloneAgentConfig {
    pub id: String,
    pub role: String,
    pub description: Option<String>,
    /// Model id; a model reference is synthesized unless one is provided.
    pub model: String,
    pub instructions: String,
    pub tools: Vec<ToolDefinition>,
    pub model_reference: Option<ModelReference>,
    pub knowledge: Option<KnowledgeConfig>,
    pub rag: Option<RagConfig>,
    pub confirmation_mode: ConfirmationMode,
}

impl StandaloneAgentConfig {
    pub fn new(
        id: impl Into<String>,
        role: impl Into<String>,
        model: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            description: None,
            model: model.into(),
            instructions: instructions.into(),
            tools: Vec::new(),
            model_reference: None,
            knowledge: None,
            rag: None,
            confirmation_mode: ConfirmationMode::default(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_model_reference(mut self, reference: ModelReference) -> Self {
        self.model_reference = Some(reference);
        self
    }

    pub fn with_knowledge(mut self, knowledge: KnowledgeConfig, rag: RagConfig) -> Self {
        self.knowledge = Some(knowledge);
        self.rag = Some(rag);
        self
    }
}

/// Shortcut path for running one agent without authoring a workflow config.
pub struct AgentRunner {
    config: StandaloneAgentConfig,
    runtime: Arc<Runtime>,
    engine: Option<WorkflowEngine>,
    pub execution_id: String,
}

impl AgentRunner {
    pub fn new(config: StandaloneAgentConfig, runtime: Arc<Runtime>) -> Self {
        Self {
            config,
            runtime,
            engine: None,
            execution_id: Uuid::new_v4().to_string(),
        }
    }

    /// Infer the provider from the environment, matching the precedence the
    /// original deployment used: enterprise endpoint first, then vendor API.
    fn detect_provider() -> ProviderKind {
        if std::env::var("AZURE_OPENAI_API_KEY").is_ok() {
            debug!("Detected azure-openai via AZURE_OPENAI_API_KEY");
            ProviderKind::AzureOpenai
        } else if std::env::var("OPENAI_API_KEY").is_ok() {
            debug!("Detected openai via OPENAI_API_KEY");
            ProviderKind::Openai
        } else {
            warn!("No provider credentials detected; defaulting to openai");
            ProviderKind::Openai
        }
    }

    /// Wrap the agent in a degenerate one-step sequential workflow.
    fn build_worker_config(&self) -> WorkerConfig {
        let model_reference = self.config.model_reference.clone().unwrap_or_else(|| {
            ModelReference {
                provider: Self::detect_provider(),
                deployment: Some(self.config.model.clone()),
                env_vars: HashMap::new(),
                extra: HashMap::new(),
            }
        });

        let mut models = HashMap::new();
        models.insert(self.config.model.clone(), model_reference);

        // The RAG section needs its embedding model resolvable.
        let rag = self.config.rag.clone();
        if let Some(rag) = &rag {
            models.entry(rag.embedding.model.clone()).or_insert_with(|| ModelReference {
                provider: Self::detect_provider(),
                deployment: Some(
                    std::env::var("AZURE_OPENAI_EMBEDDING_DEPLOYMENT")
                        .unwrap_or_else(|_| rag.embedding.model.clone()),
                ),
                env_vars: HashMap::new(),
                extra: HashMap::new(),
            });
        }

        let agent = AgentDefinition {
            id: self.config.id.clone(),
            role: self.config.role.clone(),
            description: self.config.description.clone(),
            model: self.config.model.clone(),
            instructions: self.config.instructions.clone(),
            tools: self.config.tools.iter().map(|t| t.name.clone()).collect(),
            middleware: Vec::new(),
            knowledge: self.config.knowledge.clone(),
            confirmation_mode: self.config.confirmation_mode,
        };

        WorkerConfig {
            version: "1.0".to_string(),
            name: Some(format!("standalone_{}", self.config.id)),
            resources: ResourcesConfig {
                models,
                tools: self.config.tools.clone(),
            },
            agents: vec![agent],
            workflow: WorkflowDefinition {
                kind: WorkflowKind::Sequential,
                start_step: None,
                steps: vec![WorkflowStep {
                    id: "step1".to_string(),
                    kind: StepKind::Agent,
                    agent: Some(self.config.id.clone()),
                    input_template: Some("{{user_input}}".to_string()),
                    next_step: None,
                    transitions: None,
                }],
                manager_model: None,
                manager_instructions: None,
                max_rounds: 10,
                max_stall: 3,
                termination_condition: None,
                enable_plan_review: false,
            },
            rag,
        }
    }

    fn engine(&mut self) -> WorkerResult<&mut WorkflowEngine> {
        if self.engine.is_none() {
            info!(agent = %self.config.id, "Preparing standalone agent");
            let worker_config = self.build_worker_config();
            self.engine = Some(WorkflowEngine::new(worker_config, Arc::clone(&self.runtime))?);
        }
        Ok(self.engine.as_mut().expect("engine initialized above"))
    }

    /// Run the agent and return its response text.
    pub async fn run(&mut self, input: &str) -> WorkerResult<String> {
        let engine = self.engine()?;
        let output = engine.run(input).await?;
        Ok(output_text(output))
    }

    /// Run the agent while streaming execution events.
    pub async fn run_stream(
        &mut self,
        input: &str,
        events: mpsc::Sender<ExecutionEvent>,
    ) -> WorkerResult<String> {
        let engine = self.engine()?;
        let output = engine.run_stream(input, events).await?;
        Ok(output_text(output))
    }

    /// Release the prepared engine; the next run rebuilds from scratch.
    pub fn teardown(&mut self) {
        self.engine = None;
        debug!(agent = %self.config.id, "Standalone agent resources released");
    }
}

fn output_text(output: Value) -> String {
    match output {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_worker_config_shape() {
        let config = StandaloneAgentConfig::new("helper", "Helper", "gpt-4o", "Assist the user.")
            .with_model_reference(ModelReference {
                provider: ProviderKind::Openai,
                deployment: Some("gpt-4o".into()),
                env_vars: HashMap::new(),
                extra: HashMap::new(),
            });

        let runner = AgentRunner::new(config, Runtime::new());
        let worker_config = runner.build_worker_config();

        assert_eq!(worker_config.name.as_deref(), Some("standalone_helper"));
        assert_eq!(worker_config.agents.len(), 1);
        assert_eq!(worker_config.workflow.kind, WorkflowKind::Sequential);
        assert_eq!(worker_config.workflow.steps.len(), 1);
        assert_eq!(
            worker_config.workflow.steps[0].agent.as_deref(),
            Some("helper")
        );
        assert!(worker_config.ensure_valid().is_ok());
    }

    #[test]
    fn test_output_text() {
        assert_eq!(output_text(Value::String("hi".into())), "hi");
        assert_eq!(output_text(serde_json::json!(["a"])), "[\"a\"]");
    }
}
