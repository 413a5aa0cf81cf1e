//! Vendor-hosted provider behind an Azure OpenAI enterprise endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use maestro_core::{ModelReference, ProviderKind, WorkerError, WorkerResult};

use crate::chat::ChatClient;
use crate::http_client::HttpChatClient;
use crate::registry::{resolve_required_env, ChatProvider};

const DEFAULT_API_VERSION: &str = "2024-08-01-preview";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub struct AzureOpenAiChatProvider;

impl AzureOpenAiChatProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AzureOpenAiChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatProvider for AzureOpenAiChatProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureOpenai
    }

    fn required_env_vars(&self) -> &'static [&'static str] {
        &["AZURE_OPENAI_ENDPOINT", "AZURE_OPENAI_API_KEY"]
    }

    fn create_client(&self, reference: &ModelReference) -> WorkerResult<Arc<dyn ChatClient>> {
        let env = resolve_required_env(reference, self.required_env_vars())?;
        let endpoint = env["AZURE_OPENAI_ENDPOINT"].trim_end_matches('/').to_string();
        let api_key = env["AZURE_OPENAI_API_KEY"].clone();

        let deployment = reference.deployment.clone().ok_or_else(|| {
            WorkerError::provider("azure-openai model reference requires 'deployment'")
        })?;

        let api_version = reference
            .env("AZURE_OPENAI_API_VERSION")
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint, deployment, api_version
        );

        Ok(Arc::new(HttpChatClient::new(
            url,
            deployment,
            vec![("api-key".into(), api_key)],
            DEFAULT_TIMEOUT_SECS,
        )?))
    }
}
