//! Agent factory: composes a chat client, tools, middleware, and an optional
//! retrieval context provider into a single invocable agent instance.

use std::sync::Arc;

use maestro_core::{
    ToolTransport, WorkerConfig, WorkerError, WorkerResult,
};
use maestro_providers::{ChatClient, EmbeddingClient, EmbeddingOptions};
use maestro_rag::RagContextProvider;
use serde_json::Value;
use tracing::debug;

use crate::agent::AgentInstance;
use crate::middleware::{AgentMiddleware, EventEmitter, MessageSanitizer};
use crate::runtime::Runtime;

pub struct AgentFactory {
    config: Arc<WorkerConfig>,
    runtime: Arc<Runtime>,
}

impl AgentFactory {
    pub fn new(config: Arc<WorkerConfig>, runtime: Arc<Runtime>) -> Self {
        Self { config, runtime }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Resolve a model reference id to a chat client.
    pub fn create_client(&self, model_ref: &str) -> WorkerResult<Arc<dyn ChatClient>> {
        let reference = self.config.model(model_ref).ok_or_else(|| {
            WorkerError::reference(format!("model reference '{}' not found in resources", model_ref))
        })?;
        self.runtime.providers.create_client(reference)
    }

    /// Build the embedding client declared by the RAG section.
    pub fn create_embedding_client(&self) -> WorkerResult<Arc<dyn EmbeddingClient>> {
        let rag = self
            .config
            .rag
            .as_ref()
            .ok_or_else(|| WorkerError::config("no 'rag' section configured"))?;
        let reference = self.config.model(&rag.embedding.model).ok_or_else(|| {
            WorkerError::reference(format!(
                "embedding model reference '{}' not found in resources",
                rag.embedding.model
            ))
        })?;
        let options = EmbeddingOptions {
            dimensions: rag.embedding.dimensions,
            normalize: rag.embedding.normalize,
            ..Default::default()
        };
        self.runtime.providers.create_embedding_client(reference, &options)
    }

    /// Produce a configured agent, applying step-scoped middleware last.
    ///
    /// Middleware order: message sanitizer, event emitter, user-declared,
    /// then the step middleware (templates).
    pub fn create_agent(
        &self,
        agent_id: &str,
        step_middleware: Vec<Arc<dyn AgentMiddleware>>,
    ) -> WorkerResult<AgentInstance> {
        let definition = self.config.agent(agent_id).ok_or_else(|| {
            WorkerError::reference(format!("agent '{}' not found in configuration", agent_id))
        })?;

        let client = self.create_client(&definition.model)?;

        // Resolve tools, registering resource definitions on first use.
        let mut tool_names = Vec::new();
        let mut tool_schemas: Vec<Value> = Vec::new();
        let mut hosted = Vec::new();
        for tool_id in &definition.tools {
            if !self.runtime.tools.exists(tool_id) {
                let tool_def = self.config.tool(tool_id).ok_or_else(|| {
                    WorkerError::reference(format!(
                        "tool '{}' referenced by agent '{}' not found in resources",
                        tool_id, agent_id
                    ))
                })?;
                self.runtime.tools.register(tool_def.clone())?;
            }
            let tool_def = self
                .runtime
                .tools
                .get(tool_id)
                .ok_or_else(|| WorkerError::reference(format!("tool '{}' not found", tool_id)))?;

            if tool_def.transport == ToolTransport::Hosted {
                // Hosted tools execute during the LLM call; hand the opaque
                // object to the agent instead of a callable.
                hosted.push(self.runtime.tools.hosted_handle(tool_id)?);
            } else {
                tool_schemas.push(tool_def.to_function_schema());
                tool_names.push(tool_id.clone());
            }
        }

        let mut middleware: Vec<Arc<dyn AgentMiddleware>> = vec![
            Arc::new(MessageSanitizer),
            Arc::new(EventEmitter::new(agent_id)),
        ];
        for middleware_id in &definition.middleware {
            let user_middleware = self.runtime.middleware(middleware_id).ok_or_else(|| {
                WorkerError::reference(format!(
                    "middleware '{}' referenced by agent '{}' is not registered",
                    middleware_id, agent_id
                ))
            })?;
            middleware.push(user_middleware);
        }
        middleware.extend(step_middleware);

        let display = definition.description.as_deref().unwrap_or(&definition.role);
        let description = format!("Participant ID: {}. Role/Description: {}", agent_id, display);

        let mut agent = AgentInstance::new(
            agent_id,
            &definition.role,
            description,
            &definition.instructions,
            client,
            Arc::clone(&self.runtime.tools),
            Arc::clone(&self.runtime.bus),
        )
        .with_tools(tool_names, tool_schemas)
        .with_hosted_tools(hosted)
        .with_middleware(middleware);

        // Attach a per-agent retrieval provider scoped to its collections.
        if let Some(knowledge) = &definition.knowledge {
            if knowledge.enabled {
                let rag = self.config.rag.as_ref().ok_or_else(|| {
                    WorkerError::config(format!(
                        "agent '{}' declares knowledge but the configuration has no 'rag' section",
                        agent_id
                    ))
                })?;
                let embeddings = self.create_embedding_client()?;
                let filters = if knowledge.collections.is_empty() {
                    None
                } else {
                    Some(RagContextProvider::collection_filter(&knowledge.collections))
                };
                let provider = RagContextProvider::new(
                    Arc::clone(&self.runtime.vector_store),
                    embeddings,
                    knowledge.top_k.unwrap_or(rag.top_k),
                    knowledge.min_score.or(rag.min_score).map(|s| s as f32),
                    rag.strategy,
                    rag.context_prompt.clone(),
                    rag.namespace.clone(),
                    filters,
                );
                agent = agent.with_context_provider(Arc::new(provider));
                debug!(agent = %agent_id, collections = ?knowledge.collections, "Knowledge provider attached");
            }
        }

        debug!(agent = %agent_id, tools = agent.tool_names().len(), "Agent created");
        Ok(agent)
    }

    /// Create a dedicated manager agent for orchestration strategies.
    pub fn create_manager_agent(
        &self,
        model_ref: &str,
        instructions: &str,
        name: &str,
    ) -> WorkerResult<AgentInstance> {
        let client = self.create_client(model_ref)?;
        Ok(AgentInstance::new(
            name,
            "Coordinator",
            "Orchestrator of the group",
            instructions,
            client,
            Arc::clone(&self.runtime.tools),
            Arc::clone(&self.runtime.bus),
        )
        .with_middleware(vec![
            Arc::new(MessageSanitizer),
            Arc::new(EventEmitter::new(name)),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_core::WorkerConfig;

    fn config_with_knowledge() -> WorkerConfig {
        WorkerConfig::from_yaml_str(
            r#"
resources:
  models:
    m:
      type: openai
      deployment: gpt-4o
      env_vars:
        OPENAI_API_KEY: test-key
agents:
  - id: helper
    role: Helper
    model: m
    instructions: Help.
    knowledge:
      collections: [docs]
workflow:
  type: sequential
  steps:
    - id: s1
      agent: helper
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_create_agent_description_prefix() {
        let runtime = Runtime::new();
        let config = Arc::new(
            WorkerConfig::from_yaml_str(
                r#"
resources:
  models:
    m:
      type: openai
      deployment: gpt-4o
      env_vars:
        OPENAI_API_KEY: test-key
agents:
  - id: triage
    role: Triage
    description: Routes requests
    model: m
    instructions: Route.
workflow:
  type: sequential
  steps:
    - id: s1
      agent: triage
"#,
            )
            .unwrap(),
        );

        let factory = AgentFactory::new(config, runtime);
        let agent = factory.create_agent("triage", Vec::new()).unwrap();
        assert_eq!(
            agent.description,
            "Participant ID: triage. Role/Description: Routes requests"
        );
    }

    #[test]
    fn test_unknown_agent_is_unresolved_reference() {
        let runtime = Runtime::new();
        let config = Arc::new(config_with_knowledge());
        let factory = AgentFactory::new(config, runtime);
        let err = factory.create_agent("ghost", Vec::new()).unwrap_err();
        assert!(matches!(err, WorkerError::ReferenceUnresolved(_)));
    }

    #[test]
    fn test_knowledge_without_rag_section_fails() {
        let runtime = Runtime::new();
        let config = Arc::new(config_with_knowledge());
        let factory = AgentFactory::new(config, runtime);
        let err = factory.create_agent("helper", Vec::new()).unwrap_err();
        assert!(err.to_string().contains("rag"));
    }
}
