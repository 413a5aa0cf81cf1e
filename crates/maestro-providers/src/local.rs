//! Provider for local OpenAI-compatible endpoints (Ollama, vLLM, llama.cpp).

use std::sync::Arc;

use async_trait::async_trait;
use maestro_core::{ModelReference, ProviderKind, WorkerError, WorkerResult};

use crate::chat::ChatClient;
use crate::http_client::HttpChatClient;
use crate::registry::ChatProvider;

const DEFAULT_ENDPOINT: &str = "http://localhost:11434/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct LocalEndpointProvider;

impl LocalEndpointProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LocalEndpointProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for LocalEndpointProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn required_env_vars(&self) -> &'static [&'static str] {
        &[]
    }

    fn create_client(&self, reference: &ModelReference) -> WorkerResult<Arc<dyn ChatClient>> {
        let model = reference
            .deployment
            .clone()
            .ok_or_else(|| WorkerError::provider("local model reference requires 'deployment'"))?;

        let base_url = reference
            .extra
            .get("endpoint")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| reference.env("LOCAL_LLM_ENDPOINT"))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Arc::new(HttpChatClient::new(
            format!("{}/chat/completions", base_url),
            model,
            Vec::new(),
            DEFAULT_TIMEOUT_SECS,
        )?))
    }

    async fn health_check(&self) -> bool {
        // Local endpoints need no credentials; reachability is checked lazily.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_create_with_custom_endpoint() {
        let provider = LocalEndpointProvider::new();
        let reference = ModelReference {
            provider: ProviderKind::Local,
            deployment: Some("llama3".into()),
            env_vars: HashMap::new(),
            extra: HashMap::from([(
                "endpoint".to_string(),
                serde_json::json!("http://127.0.0.1:8000/v1/"),
            )]),
        };
        let client = provider.create_client(&reference).unwrap();
        assert_eq!(client.model_id(), "llama3");
    }

    #[test]
    fn test_missing_deployment() {
        let provider = LocalEndpointProvider::new();
        let reference = ModelReference {
            provider: ProviderKind::Local,
            deployment: None,
            env_vars: HashMap::new(),
            extra: HashMap::new(),
        };
        assert!(provider.create_client(&reference).is_err());
    }
}
