//! Tool data model: definitions, parameters, retry policy, and results.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransientErrorKind;

/// How a tool is executed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ToolTransport {
    /// Statically registered in-process callable.
    #[default]
    Local,
    /// HTTP/REST endpoint.
    Http,
    /// Vendor-hosted tool executed during the LLM call.
    Hosted,
    /// Tool served by an MCP server.
    Mcp,
    /// User-supplied adapter.
    Custom,
}

/// Human-in-the-loop approval modes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    #[default]
    Never,
    Always,
    OnFirst,
    Conditional,
}

/// Kinds of vendor-hosted tools.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HostedToolKind {
    CodeInterpreter,
    WebSearch,
    FileSearch,
    Mcp,
}

impl HostedToolKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code_interpreter" => Some(Self::CodeInterpreter),
            "web_search" => Some(Self::WebSearch),
            "file_search" => Some(Self::FileSearch),
            "mcp" => Some(Self::Mcp),
            _ => None,
        }
    }
}

/// Retry policy for tool and embedding calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay in seconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay: f64,

    /// Maximum delay in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,

    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,

    /// Error kinds that should be retried.
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<TransientErrorKind>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> f64 {
    1.0
}

fn default_max_delay() -> f64 {
    30.0
}

fn default_exponential_base() -> f64 {
    2.0
}

fn default_retryable_errors() -> Vec<TransientErrorKind> {
    vec![
        TransientErrorKind::RateLimited,
        TransientErrorKind::Timeout,
        TransientErrorKind::Connection,
        TransientErrorKind::TransientStatus,
    ]
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            exponential_base: default_exponential_base(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after attempt `n` (1-based):
    /// `min(initial * base^(n-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.exponential_base.powi(attempt.saturating_sub(1) as i32);
        let secs = (self.initial_delay * exp).min(self.max_delay);
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// JSON-Schema-equivalent parameter types.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParameterType {
    fn as_str(&self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Boolean => "boolean",
            ParameterType::Object => "object",
            ParameterType::Array => "array",
        }
    }
}

/// A single declared tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolParameter {
    pub name: String,

    #[serde(rename = "type", default)]
    pub param_type: ParameterType,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
}

impl ToolParameter {
    pub fn to_json_schema(&self) -> Value {
        let mut schema = serde_json::Map::new();
        schema.insert("type".into(), Value::String(self.param_type.as_str().into()));
        if !self.description.is_empty() {
            schema.insert("description".into(), Value::String(self.description.clone()));
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }
        if let Some(values) = &self.allowed_values {
            schema.insert("enum".into(), Value::Array(values.clone()));
        }
        Value::Object(schema)
    }
}

/// Complete definition of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,

    #[serde(rename = "transport", default, alias = "type")]
    pub transport: ToolTransport,

    /// Dotted path, URL, `hosted://<kind>`, or MCP server id.
    pub source: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ToolParameter>,

    /// Timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,

    #[serde(default)]
    pub approval_mode: ApprovalMode,

    /// Maximum invocations per process; unlimited when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_invocations: Option<u32>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// HTTP adapter configuration (method, headers, auth, response_path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_config: Option<Value>,

    /// MCP adapter configuration (transport, command, endpoint).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_config: Option<Value>,

    /// Hosted tool configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hosted_config: Option<Value>,
}

fn default_timeout() -> f64 {
    30.0
}

fn default_enabled() -> bool {
    true
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        transport: ToolTransport,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            transport,
            source: source.into(),
            parameters: Vec::new(),
            timeout: default_timeout(),
            retry_policy: None,
            approval_mode: ApprovalMode::default(),
            max_invocations: None,
            enabled: true,
            http_config: None,
            mcp_config: None,
            hosted_config: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ToolParameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// OpenAI-style function declaration for this tool.
    pub fn to_function_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            properties.insert(param.name.clone(), param.to_json_schema());
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }

        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": {
                    "type": "object",
                    "properties": properties,
                    "required": required,
                },
            },
        })
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Execution time in seconds.
    pub execution_time: f64,

    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl ToolResult {
    pub fn success_result(
        tool_name: impl Into<String>,
        result: Value,
        execution_time: f64,
        attempts: u32,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            result: Some(result),
            error: None,
            execution_time,
            attempts,
            timestamp: Utc::now(),
        }
    }

    pub fn error_result(
        tool_name: impl Into<String>,
        error: impl Into<String>,
        execution_time: f64,
        attempts: u32,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            execution_time,
            attempts,
            timestamp: Utc::now(),
        }
    }
}

/// Execution-scoped context threaded through tool invocations.
#[derive(Debug, Clone, Default)]
pub struct ToolExecutionContext {
    pub session_id: Option<String>,
    pub workflow_id: Option<String>,
    pub agent_name: Option<String>,

    /// Auth token substituted for `{token}` placeholders.
    pub auth_token: Option<String>,

    /// Environment map substituted for `{<ENV_NAME>}` placeholders.
    pub env_vars: HashMap<String, String>,

    /// Extra headers for HTTP tools.
    pub headers: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: 1.0,
            max_delay: 4.0,
            exponential_base: 2.0,
            retryable_errors: default_retryable_errors(),
        };

        assert_eq!(policy.delay_for(1), Duration::from_secs_f64(1.0));
        assert_eq!(policy.delay_for(2), Duration::from_secs_f64(2.0));
        assert_eq!(policy.delay_for(3), Duration::from_secs_f64(4.0));
        // Capped at max_delay.
        assert_eq!(policy.delay_for(4), Duration::from_secs_f64(4.0));
    }

    #[test]
    fn test_tool_definition_yaml() {
        let yaml = r#"
            name: calculate
            description: Evaluate an arithmetic expression
            transport: local
            source: tools.math.calculate
            parameters:
              - name: expression
                type: string
                description: The expression to evaluate
                required: true
            timeout: 10
        "#;

        let def: ToolDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.name, "calculate");
        assert_eq!(def.transport, ToolTransport::Local);
        assert_eq!(def.parameters.len(), 1);
        assert!(def.parameters[0].required);
        assert_eq!(def.timeout, 10.0);
        assert!(def.enabled);
        assert_eq!(def.approval_mode, ApprovalMode::Never);
    }

    #[test]
    fn test_function_schema() {
        let def = ToolDefinition::new("lookup", "Look up a record", ToolTransport::Local, "db.lookup")
            .with_parameters(vec![
                ToolParameter {
                    name: "key".into(),
                    param_type: ParameterType::String,
                    description: "Record key".into(),
                    required: true,
                    default: None,
                    allowed_values: None,
                },
                ToolParameter {
                    name: "limit".into(),
                    param_type: ParameterType::Number,
                    description: String::new(),
                    required: false,
                    default: Some(serde_json::json!(10)),
                    allowed_values: None,
                },
            ]);

        let schema = def.to_function_schema();
        assert_eq!(schema["function"]["name"], "lookup");
        assert_eq!(
            schema["function"]["parameters"]["properties"]["key"]["type"],
            "string"
        );
        assert_eq!(
            schema["function"]["parameters"]["required"],
            serde_json::json!(["key"])
        );
        assert_eq!(
            schema["function"]["parameters"]["properties"]["limit"]["default"],
            10
        );
    }

    #[test]
    fn test_tool_result_factories() {
        let ok = ToolResult::success_result("calc", serde_json::json!(42), 0.1, 1);
        assert!(ok.success);
        assert_eq!(ok.result, Some(serde_json::json!(42)));
        assert!(ok.error.is_none());

        let err = ToolResult::error_result("calc", "division by zero", 0.2, 3);
        assert!(!err.success);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.error.as_deref(), Some("division by zero"));
    }

    #[test]
    fn test_hosted_kind_parse() {
        assert_eq!(
            HostedToolKind::parse("code_interpreter"),
            Some(HostedToolKind::CodeInterpreter)
        );
        assert_eq!(HostedToolKind::parse("web_search"), Some(HostedToolKind::WebSearch));
        assert_eq!(HostedToolKind::parse("unknown"), None);
    }

    #[test]
    fn test_retry_policy_yaml_defaults() {
        let policy: RetryPolicy = serde_yaml::from_str("max_attempts: 5").unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, 1.0);
        assert_eq!(policy.retryable_errors.len(), 4);
    }
}
