//! Adapter for HTTP/REST tools.
//!
//! GET requests carry arguments as query parameters, every other method as a
//! JSON body. Headers support `{token}` and `{<ENV_NAME>}` placeholders
//! resolved from the execution context. One HTTP client is shared across
//! invocations.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use maestro_core::{
    ToolDefinition, ToolExecutionContext, ToolTransport, TransientErrorKind, WorkerError,
    WorkerResult,
};
use serde_json::Value;
use tracing::debug;

use super::ToolAdapter;

const VALID_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

/// Merged per-tool HTTP configuration.
#[derive(Debug, Clone)]
struct HttpConfig {
    method: String,
    headers: HashMap<String, String>,
    timeout: f64,
    verify_ssl: bool,
    auth_type: String,
    auth_header: String,
    response_path: Option<String>,
}

impl HttpConfig {
    fn from_definition(definition: &ToolDefinition) -> Self {
        let raw = definition.http_config.as_ref();
        let get_str = |key: &str, default: &str| -> String {
            raw.and_then(|c| c.get(key))
                .and_then(|v| v.as_str())
                .unwrap_or(default)
                .to_string()
        };

        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        if let Some(declared) = raw.and_then(|c| c.get("headers")).and_then(|v| v.as_object()) {
            for (key, value) in declared {
                if let Some(value) = value.as_str() {
                    headers.insert(key.clone(), value.to_string());
                }
            }
        }

        Self {
            method: get_str("method", "POST").to_uppercase(),
            headers,
            timeout: raw
                .and_then(|c| c.get("timeout"))
                .and_then(|v| v.as_f64())
                .unwrap_or(definition.timeout),
            verify_ssl: raw
                .and_then(|c| c.get("verify_ssl"))
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            auth_type: get_str("auth_type", "bearer"),
            auth_header: get_str("auth_header", "Authorization"),
            response_path: raw
                .and_then(|c| c.get("response_path"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
        }
    }
}

pub struct HttpToolAdapter {
    client: reqwest::Client,
    insecure_client: OnceLock<reqwest::Client>,
}

impl HttpToolAdapter {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            insecure_client: OnceLock::new(),
        }
    }

    fn client_for(&self, verify_ssl: bool) -> &reqwest::Client {
        if verify_ssl {
            &self.client
        } else {
            self.insecure_client.get_or_init(|| {
                reqwest::Client::builder()
                    .danger_accept_invalid_certs(true)
                    .build()
                    .expect("reqwest client construction does not fail with static options")
            })
        }
    }

    fn resolve_headers(
        config: &HttpConfig,
        context: &ToolExecutionContext,
    ) -> HashMap<String, String> {
        let mut resolved = HashMap::new();
        for (key, value) in &config.headers {
            let mut value = value.clone();
            if value.contains('{') {
                if let Some(token) = &context.auth_token {
                    value = value.replace("{token}", token);
                }
                for (env_key, env_value) in &context.env_vars {
                    value = value.replace(&format!("{{{}}}", env_key), env_value);
                }
            }
            resolved.insert(key.clone(), value);
        }
        for (key, value) in &context.headers {
            resolved.insert(key.clone(), value.clone());
        }
        resolved
    }

    fn apply_auth(
        headers: &mut HashMap<String, String>,
        config: &HttpConfig,
        context: &ToolExecutionContext,
    ) {
        let Some(token) = &context.auth_token else { return };
        match config.auth_type.as_str() {
            "bearer" => {
                headers.insert(config.auth_header.clone(), format!("Bearer {}", token));
            }
            "basic" => {
                headers.insert(config.auth_header.clone(), format!("Basic {}", token));
            }
            "api-key" | "api_key" => {
                headers.insert(config.auth_header.clone(), token.clone());
            }
            _ => {}
        }
    }

    /// Extract a sub-field using a dotted path, falling back to the full body.
    fn extract_result(data: Value, response_path: Option<&str>) -> Value {
        let Some(path) = response_path else { return data };
        let mut current = &data;
        for part in path.split('.') {
            let next = match current {
                Value::Object(map) => map.get(part),
                Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return data,
            }
        }
        current.clone()
    }
}

impl Default for HttpToolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolAdapter for HttpToolAdapter {
    fn transport(&self) -> ToolTransport {
        ToolTransport::Http
    }

    fn validate(&self, definition: &ToolDefinition) -> Vec<String> {
        let mut errors = Vec::new();

        if !definition.source.starts_with("http://") && !definition.source.starts_with("https://") {
            errors.push(format!(
                "HTTP tool source must be an http(s) URL, got '{}'",
                definition.source
            ));
        }

        if let Some(config) = &definition.http_config {
            if let Some(method) = config.get("method").and_then(|v| v.as_str()) {
                if !VALID_METHODS.contains(&method.to_uppercase().as_str()) {
                    errors.push(format!("invalid HTTP method '{}'", method));
                }
            }
        }

        errors
    }

    async fn execute(
        &self,
        definition: &ToolDefinition,
        arguments: Value,
        context: &ToolExecutionContext,
    ) -> WorkerResult<Value> {
        let config = HttpConfig::from_definition(definition);
        let mut headers = Self::resolve_headers(&config, context);
        Self::apply_auth(&mut headers, &config, context);

        debug!(tool = %definition.name, method = %config.method, url = %definition.source, "HTTP tool request");

        let client = self.client_for(config.verify_ssl);
        let method: reqwest::Method = config
            .method
            .parse()
            .map_err(|_| WorkerError::tool_validation(format!("invalid HTTP method '{}'", config.method)))?;

        let mut request = client
            .request(method.clone(), &definition.source)
            .timeout(Duration::from_secs_f64(config.timeout));
        for (key, value) in &headers {
            request = request.header(key.as_str(), value.as_str());
        }

        // GET sends arguments as query params; other methods as JSON body.
        if method == reqwest::Method::GET {
            if let Value::Object(map) = &arguments {
                let params: Vec<(String, String)> = map
                    .iter()
                    .map(|(k, v)| {
                        let value = match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (k.clone(), value)
                    })
                    .collect();
                request = request.query(&params);
            }
        } else {
            request = request.json(&arguments);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                WorkerError::tool_transient(e.to_string(), TransientErrorKind::Timeout)
            } else if e.is_connect() {
                WorkerError::tool_transient(e.to_string(), TransientErrorKind::Connection)
            } else {
                WorkerError::tool(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| WorkerError::tool(e.to_string()))?;

        if !(200..300).contains(&status) {
            let message = format!("HTTP {} from '{}'", status, definition.name);
            return Err(match status {
                429 => WorkerError::tool_transient(message, TransientErrorKind::RateLimited),
                500..=599 => {
                    WorkerError::tool_transient(message, TransientErrorKind::TransientStatus)
                }
                _ => WorkerError::tool(message),
            });
        }

        let data: Value = serde_json::from_str(&body).unwrap_or(Value::String(body));
        Ok(Self::extract_result(data, config.response_path.as_deref()))
    }
}
