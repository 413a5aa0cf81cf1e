//! Vendor-native OpenAI chat provider.

use std::sync::Arc;

use async_trait::async_trait;
use maestro_core::{ModelReference, ProviderKind, WorkerError, WorkerResult};

use crate::chat::ChatClient;
use crate::http_client::HttpChatClient;
use crate::registry::{resolve_required_env, ChatProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub struct OpenAiChatProvider;

impl OpenAiChatProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OpenAiChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Openai
    }

    fn required_env_vars(&self) -> &'static [&'static str] {
        &["OPENAI_API_KEY"]
    }

    fn create_client(&self, reference: &ModelReference) -> WorkerResult<Arc<dyn ChatClient>> {
        let env = resolve_required_env(reference, self.required_env_vars())?;
        let api_key = env["OPENAI_API_KEY"].clone();

        let model = reference
            .deployment
            .clone()
            .ok_or_else(|| WorkerError::provider("openai model reference requires 'deployment'"))?;

        let base_url = reference
            .extra
            .get("endpoint")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Arc::new(HttpChatClient::new(
            format!("{}/chat/completions", base_url),
            model,
            vec![("Authorization".into(), format!("Bearer {}", api_key))],
            DEFAULT_TIMEOUT_SECS,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_api_key() {
        let provider = OpenAiChatProvider::new();
        let reference = ModelReference {
            provider: ProviderKind::Openai,
            deployment: Some("gpt-4o".into()),
            env_vars: HashMap::from([("OPENAI_API_KEY".to_string(), String::new())]),
            extra: HashMap::new(),
        };
        // Empty override shadows any process env; creation must fail.
        let err = provider.create_client(&reference).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_create_client_with_override() {
        let provider = OpenAiChatProvider::new();
        let reference = ModelReference {
            provider: ProviderKind::Openai,
            deployment: Some("gpt-4o".into()),
            env_vars: HashMap::from([("OPENAI_API_KEY".to_string(), "sk-test".to_string())]),
            extra: HashMap::new(),
        };
        let client = provider.create_client(&reference).unwrap();
        assert_eq!(client.model_id(), "gpt-4o");
    }
}
