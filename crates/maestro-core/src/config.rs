//! Declarative configuration model and loader.
//!
//! A worker configuration names models, tools, agents, a workflow, and an
//! optional RAG section. The loader parses JSON or YAML into the typed model
//! and validates cross-references before any component is constructed,
//! reporting every violation rather than stopping at the first.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WorkerError, WorkerResult};
use crate::tool::{ToolDefinition, ToolTransport};

/// LLM provider families.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Vendor-native API (api key from env).
    Openai,
    /// Vendor hosted behind an enterprise endpoint.
    AzureOpenai,
    /// Local OpenAI-compatible endpoint.
    Local,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderKind::Openai => "openai",
            ProviderKind::AzureOpenai => "azure-openai",
            ProviderKind::Local => "local",
        };
        write!(f, "{}", s)
    }
}

/// A named model entry in `resources.models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelReference {
    #[serde(rename = "type")]
    pub provider: ProviderKind,

    /// Deployment name or model id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,

    /// Environment overrides consulted before the process environment.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env_vars: HashMap<String, String>,

    /// Provider-specific extras (e.g. `endpoint` for local providers).
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ModelReference {
    /// Resolve an environment variable, preferring the reference overrides.
    pub fn env(&self, key: &str) -> Option<String> {
        self.env_vars
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }
}

/// Per-agent knowledge (RAG) attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Collections this agent may retrieve from.
    #[serde(default)]
    pub collections: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
}

/// Human interaction modes for human steps.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationMode {
    #[default]
    Cli,
    Structured,
    Auto,
}

/// Declarative agent definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: String,
    pub role: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Reference to a model defined in `resources.models`.
    pub model: String,

    pub instructions: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,

    /// Ids of registered middleware applied after the built-in chain.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middleware: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<KnowledgeConfig>,

    #[serde(default)]
    pub confirmation_mode: ConfirmationMode,
}

/// Step kinds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    #[default]
    Agent,
    Human,
}

/// One step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: StepKind,

    /// Agent id (required when kind is `agent`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// Template with `{{user_input}}` / `{{previous_output}}` placeholders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_template: Option<String>,

    #[serde(rename = "next", skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,

    /// Allowed handoff targets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Vec<String>>,
}

/// Orchestration patterns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Sequential,
    Parallel,
    GroupChat,
    Handoff,
    Router,
    Magentic,
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowKind::Sequential => "sequential",
            WorkflowKind::Parallel => "parallel",
            WorkflowKind::GroupChat => "group_chat",
            WorkflowKind::Handoff => "handoff",
            WorkflowKind::Router => "router",
            WorkflowKind::Magentic => "magentic",
        };
        write!(f, "{}", s)
    }
}

/// Workflow declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(rename = "type")]
    pub kind: WorkflowKind,

    /// Entry step (required for router/handoff).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_step: Option<String>,

    pub steps: Vec<WorkflowStep>,

    /// Model used by the group-chat/magentic manager.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_instructions: Option<String>,

    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Consecutive unproductive rounds tolerated before escalation.
    #[serde(default = "default_max_stall")]
    pub max_stall: u32,

    /// Case-insensitive substring that terminates looping workflows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_condition: Option<String>,

    /// Pause magentic runs for external approval of the generated plan.
    #[serde(default)]
    pub enable_plan_review: bool,
}

fn default_max_rounds() -> u32 {
    10
}

fn default_max_stall() -> u32 {
    3
}

/// Query-building strategies for the RAG context provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RagStrategy {
    /// Text of the most recent user message.
    #[default]
    LastMessage,
    /// Concatenation of every user and assistant message.
    Conversation,
}

/// Embedding configuration for the RAG runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagEmbeddingConfig {
    /// Reference to a model defined in `resources.models`.
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<usize>,

    #[serde(default = "default_true")]
    pub normalize: bool,
}

/// RAG runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_rag_provider")]
    pub provider: String,

    pub embedding: RagEmbeddingConfig,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,

    #[serde(default)]
    pub strategy: RagStrategy,

    #[serde(default = "default_context_prompt")]
    pub context_prompt: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_true() -> bool {
    true
}

fn default_rag_provider() -> String {
    "memory".to_string()
}

fn default_top_k() -> usize {
    4
}

fn default_context_prompt() -> String {
    "Relevant context retrieved from the knowledge base:".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

impl RagConfig {
    /// Signature tying stored vectors to this embedding regime.
    pub fn embedding_signature(&self, provider: &ProviderKind) -> String {
        format!(
            "{}||{}||{}||{}",
            provider,
            self.embedding.model,
            self.embedding.normalize,
            self.embedding
                .dimensions
                .map(|d| d.to_string())
                .unwrap_or_else(|| "auto".to_string()),
        )
    }
}

/// Shared resources: model references and tool definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    pub models: HashMap<String, ModelReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// Top-level worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub resources: ResourcesConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentDefinition>,

    pub workflow: WorkflowDefinition,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rag: Option<RagConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &["version", "name", "resources", "agents", "workflow", "rag"];

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A single validation finding.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl WorkerConfig {
    /// Parse from a YAML document.
    pub fn from_yaml_str(content: &str) -> WorkerResult<Self> {
        Self::from_yaml_str_with_mode(content, false)
    }

    /// Parse from a YAML document, optionally rejecting unknown top-level keys.
    pub fn from_yaml_str_with_mode(content: &str, strict: bool) -> WorkerResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| WorkerError::config(format!("failed to parse YAML: {}", e)))?;
        Self::check_unknown_keys(&value, strict)?;

        let deserializer = serde_yaml::Deserializer::from_str(content);
        serde_path_to_error::deserialize(deserializer)
            .map_err(|e| WorkerError::config(format!("invalid configuration at {}: {}", e.path(), e)))
    }

    /// Parse from a JSON document.
    pub fn from_json_str(content: &str) -> WorkerResult<Self> {
        Self::from_json_str_with_mode(content, false)
    }

    /// Parse from a JSON document, optionally rejecting unknown top-level keys.
    pub fn from_json_str_with_mode(content: &str, strict: bool) -> WorkerResult<Self> {
        let value: serde_yaml::Value = serde_json::from_str::<serde_json::Value>(content)
            .map_err(|e| WorkerError::config(format!("failed to parse JSON: {}", e)))
            .and_then(|v| {
                serde_yaml::to_value(v).map_err(|e| WorkerError::config(e.to_string()))
            })?;
        Self::check_unknown_keys(&value, strict)?;

        let mut deserializer = serde_json::Deserializer::from_str(content);
        serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| WorkerError::config(format!("invalid configuration at {}: {}", e.path(), e)))
    }

    /// Load from a `.yaml`/`.yml`/`.json` file.
    pub fn from_file(path: &Path) -> WorkerResult<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Serialize back to YAML.
    pub fn to_yaml_string(&self) -> WorkerResult<String> {
        serde_yaml::to_string(self).map_err(|e| WorkerError::config(e.to_string()))
    }

    fn check_unknown_keys(value: &serde_yaml::Value, strict: bool) -> WorkerResult<()> {
        let Some(mapping) = value.as_mapping() else {
            return Err(WorkerError::config("configuration root must be a mapping"));
        };

        for key in mapping.keys() {
            let Some(key) = key.as_str() else { continue };
            if !KNOWN_TOP_LEVEL_KEYS.contains(&key) {
                if strict {
                    return Err(WorkerError::config(format!(
                        "unknown top-level key '{}'",
                        key
                    )));
                }
                tracing::warn!(key = %key, "Unknown top-level configuration key ignored");
            }
        }
        Ok(())
    }

    /// Cross-reference validation. Returns every violation, not just the first.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        // Step ids unique within the workflow.
        let mut seen_steps = HashSet::new();
        for step in &self.workflow.steps {
            if !seen_steps.insert(step.id.as_str()) {
                issues.push(ValidationIssue::error(
                    format!("workflow.steps.{}", step.id),
                    format!("duplicate step id '{}'", step.id),
                ));
            }
        }

        // Agent ids unique.
        let mut seen_agents = HashSet::new();
        for agent in &self.agents {
            if !seen_agents.insert(agent.id.as_str()) {
                issues.push(ValidationIssue::error(
                    format!("agents.{}", agent.id),
                    format!("duplicate agent id '{}'", agent.id),
                ));
            }
        }

        let agent_ids: HashSet<&str> = self.agents.iter().map(|a| a.id.as_str()).collect();
        let tool_names: HashSet<&str> = self
            .resources
            .tools
            .iter()
            .map(|t| t.name.as_str())
            .collect();

        // Tool names unique.
        let mut seen_tools = HashSet::new();
        for tool in &self.resources.tools {
            if !seen_tools.insert(tool.name.as_str()) {
                issues.push(ValidationIssue::error(
                    format!("resources.tools.{}", tool.name),
                    format!("duplicate tool name '{}'", tool.name),
                ));
            }
            issues.extend(validate_tool_source(tool));
        }

        // Step -> agent references.
        for step in &self.workflow.steps {
            match step.kind {
                StepKind::Agent => match &step.agent {
                    Some(agent_id) if !agent_ids.contains(agent_id.as_str()) => {
                        issues.push(ValidationIssue::error(
                            format!("workflow.steps.{}.agent", step.id),
                            format!("referenced agent '{}' not found", agent_id),
                        ));
                    }
                    None => {
                        issues.push(ValidationIssue::error(
                            format!("workflow.steps.{}", step.id),
                            "agent step must declare an 'agent'",
                        ));
                    }
                    _ => {}
                },
                StepKind::Human => {}
            }
        }

        // Agent -> tool and model references.
        for agent in &self.agents {
            for tool_id in &agent.tools {
                if !tool_names.contains(tool_id.as_str()) {
                    issues.push(ValidationIssue::error(
                        format!("agents.{}.tools", agent.id),
                        format!("referenced tool '{}' not found", tool_id),
                    ));
                }
            }
            if !self.resources.models.contains_key(&agent.model) {
                issues.push(ValidationIssue::error(
                    format!("agents.{}.model", agent.id),
                    format!("referenced model '{}' not found", agent.model),
                ));
            }
        }

        // Manager model reference.
        if let Some(manager_model) = &self.workflow.manager_model {
            if !self.resources.models.contains_key(manager_model) {
                issues.push(ValidationIssue::error(
                    "workflow.manager_model",
                    format!("referenced model '{}' not found", manager_model),
                ));
            }
        }

        // RAG embedding model reference.
        if let Some(rag) = &self.rag {
            if rag.enabled && !self.resources.models.contains_key(&rag.embedding.model) {
                issues.push(ValidationIssue::error(
                    "rag.embedding.model",
                    format!("referenced model '{}' not found", rag.embedding.model),
                ));
            }
        }

        issues
    }

    /// Fail with `config_invalid` listing every error-severity violation.
    pub fn ensure_valid(&self) -> WorkerResult<()> {
        let issues = self.validate();
        let errors: Vec<String> = issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .map(|i| i.to_string())
            .collect();
        for warning in issues.iter().filter(|i| i.severity == Severity::Warning) {
            tracing::warn!("{}", warning);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(WorkerError::config(errors.join("; ")))
        }
    }

    pub fn agent(&self, id: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.resources.tools.iter().find(|t| t.name == name)
    }

    pub fn model(&self, id: &str) -> Option<&ModelReference> {
        self.resources.models.get(id)
    }
}

fn validate_tool_source(tool: &ToolDefinition) -> Vec<ValidationIssue> {
    let field = format!("resources.tools.{}.source", tool.name);
    let mut issues = Vec::new();

    if tool.source.trim().is_empty() {
        issues.push(ValidationIssue::error(field, "source must not be empty"));
        return issues;
    }

    match tool.transport {
        ToolTransport::Http => {
            if !tool.source.starts_with("http://") && !tool.source.starts_with("https://") {
                issues.push(ValidationIssue::error(
                    field,
                    format!("HTTP tool source must be a URL, got '{}'", tool.source),
                ));
            }
        }
        ToolTransport::Hosted => {
            let valid = tool
                .source
                .strip_prefix("hosted://")
                .map(|kind| crate::tool::HostedToolKind::parse(kind).is_some())
                .unwrap_or(false);
            if !valid {
                issues.push(ValidationIssue::error(
                    field,
                    format!(
                        "hosted tool source must be hosted://<kind>, got '{}'",
                        tool.source
                    ),
                ));
            }
        }
        ToolTransport::Local => {
            let path = tool.source.replace(':', ".");
            let well_formed = path
                .split('.')
                .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_'));
            if !well_formed {
                issues.push(ValidationIssue::error(
                    field,
                    format!("local tool source must be a dotted path, got '{}'", tool.source),
                ));
            }
        }
        ToolTransport::Mcp | ToolTransport::Custom => {}
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version: "1.0"
name: support-triage
resources:
  models:
    gpt4:
      type: openai
      deployment: gpt-4o
  tools:
    - name: calculate
      description: Evaluate an expression
      transport: local
      source: tools.math.calculate
agents:
  - id: triage
    role: Triage agent
    model: gpt4
    instructions: Classify the request.
    tools: [calculate]
  - id: responder
    role: Responder
    model: gpt4
    instructions: Answer the request.
workflow:
  type: sequential
  steps:
    - id: s1
      agent: triage
    - id: s2
      agent: responder
"#;

    #[test]
    fn test_parse_valid_config() {
        let config = WorkerConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.name.as_deref(), Some("support-triage"));
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.workflow.kind, WorkflowKind::Sequential);
        assert_eq!(config.workflow.max_rounds, 10);
        assert!(config.validate().is_empty());
        assert!(config.ensure_valid().is_ok());
    }

    #[test]
    fn test_unknown_top_level_key_strict() {
        let doc = format!("{}\nbogus_key: 1\n", SAMPLE);
        assert!(WorkerConfig::from_yaml_str(&doc).is_ok());
        let err = WorkerConfig::from_yaml_str_with_mode(&doc, true).unwrap_err();
        assert!(err.to_string().contains("bogus_key"));
    }

    #[test]
    fn test_validation_collects_all_violations() {
        let yaml = r#"
resources:
  models:
    gpt4:
      type: openai
  tools: []
agents:
  - id: a1
    role: One
    model: missing-model
    instructions: x
    tools: [missing-tool]
workflow:
  type: sequential
  steps:
    - id: s1
      agent: a1
    - id: s1
      agent: nobody
"#;
        let config = WorkerConfig::from_yaml_str(yaml).unwrap();
        let issues = config.validate();
        let messages: Vec<String> = issues.iter().map(|i| i.to_string()).collect();

        assert!(messages.iter().any(|m| m.contains("duplicate step id")));
        assert!(messages.iter().any(|m| m.contains("'missing-tool' not found")));
        assert!(messages.iter().any(|m| m.contains("'missing-model' not found")));
        assert!(messages.iter().any(|m| m.contains("'nobody' not found")));
        assert!(issues.len() >= 4);
        assert!(config.ensure_valid().is_err());
    }

    #[test]
    fn test_tool_source_validation() {
        let yaml = r#"
resources:
  models:
    m:
      type: openai
  tools:
    - name: bad_http
      description: x
      transport: http
      source: not-a-url
    - name: bad_hosted
      description: x
      transport: hosted
      source: hosted://unknown_kind
workflow:
  type: sequential
  steps: []
"#;
        let config = WorkerConfig::from_yaml_str(yaml).unwrap();
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.field.contains("bad_http")));
        assert!(issues.iter().any(|i| i.field.contains("bad_hosted")));
    }

    #[test]
    fn test_json_parse() {
        let json = serde_json::json!({
            "resources": {
                "models": {"m": {"type": "azure-openai", "deployment": "gpt-4o"}},
            },
            "agents": [],
            "workflow": {"type": "parallel", "steps": []},
        });
        let config = WorkerConfig::from_json_str(&json.to_string()).unwrap();
        assert_eq!(config.workflow.kind, WorkflowKind::Parallel);
        assert_eq!(
            config.resources.models["m"].provider,
            ProviderKind::AzureOpenai
        );
    }

    #[test]
    fn test_roundtrip_preserves_document() {
        let config = WorkerConfig::from_yaml_str(SAMPLE).unwrap();
        let serialized = config.to_yaml_string().unwrap();
        let reparsed = WorkerConfig::from_yaml_str(&serialized).unwrap();

        // Equality up to ordering of unordered maps.
        let a = serde_json::to_value(&config).unwrap();
        let b = serde_json::to_value(&reparsed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rag_config_defaults_and_signature() {
        let yaml = r#"
enabled: true
embedding:
  model: embeddings
  dimensions: 1536
"#;
        let rag: RagConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rag.top_k, 4);
        assert_eq!(rag.strategy, RagStrategy::LastMessage);
        assert_eq!(rag.namespace, "default");
        assert!(rag.embedding.normalize);

        let signature = rag.embedding_signature(&ProviderKind::Openai);
        assert_eq!(signature, "openai||embeddings||true||1536");
    }

    #[test]
    fn test_workflow_step_aliases() {
        let yaml = r#"
id: s1
agent: a1
next: s2
input_template: "Summarize: {{previous_output}}"
"#;
        let step: WorkflowStep = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.kind, StepKind::Agent);
        assert_eq!(step.next_step.as_deref(), Some("s2"));
        assert!(step.input_template.is_some());
    }

    #[test]
    fn test_model_reference_env_override() {
        let mut env_vars = HashMap::new();
        env_vars.insert("OPENAI_API_KEY".to_string(), "test-key".to_string());
        let reference = ModelReference {
            provider: ProviderKind::Openai,
            deployment: Some("gpt-4o".into()),
            env_vars,
            extra: HashMap::new(),
        };
        assert_eq!(reference.env("OPENAI_API_KEY").as_deref(), Some("test-key"));
    }

    #[test]
    fn test_group_chat_workflow_parse() {
        let yaml = r#"
type: group_chat
manager_model: gpt4
manager_instructions: Pick the best expert.
max_rounds: 6
termination_condition: TASK_COMPLETE
steps:
  - id: security
    agent: security_expert
  - id: performance
    agent: performance_expert
"#;
        let workflow: WorkflowDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(workflow.kind, WorkflowKind::GroupChat);
        assert_eq!(workflow.max_rounds, 6);
        assert_eq!(workflow.termination_condition.as_deref(), Some("TASK_COMPLETE"));
        assert!(!workflow.enable_plan_review);
    }
}
