//! Provider registry mapping model references to chat and embedding clients.
//!
//! One registry instance lives on the runtime; tests build their own and
//! swap providers in. There is no process-global state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use maestro_core::{ModelReference, ProviderKind, WorkerError, WorkerResult};
use parking_lot::RwLock;

use crate::chat::ChatClient;
use crate::embeddings::{EmbeddingClient, EmbeddingOptions};

/// A chat provider hides vendor-specific client construction.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Environment variables consulted at client creation.
    fn required_env_vars(&self) -> &'static [&'static str];

    /// Models this provider accepts; empty means "any".
    fn supported_models(&self) -> Vec<String> {
        Vec::new()
    }

    fn create_client(&self, reference: &ModelReference) -> WorkerResult<Arc<dyn ChatClient>>;

    /// Whether the provider looks usable (default: required env present).
    async fn health_check(&self) -> bool {
        self.required_env_vars()
            .iter()
            .all(|var| std::env::var(var).is_ok())
    }
}

/// Factory signature for embedding clients.
pub type EmbeddingFactory = Arc<
    dyn Fn(&ModelReference, &EmbeddingOptions) -> WorkerResult<Arc<dyn EmbeddingClient>>
        + Send
        + Sync,
>;

/// Registry of chat providers and embedding factories, keyed by provider kind.
pub struct ProviderRegistry {
    chat_providers: RwLock<HashMap<ProviderKind, Arc<dyn ChatProvider>>>,
    embedding_factories: RwLock<HashMap<ProviderKind, EmbeddingFactory>>,
}

impl ProviderRegistry {
    /// Empty registry, for tests that register their own providers.
    pub fn empty() -> Self {
        Self {
            chat_providers: RwLock::new(HashMap::new()),
            embedding_factories: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the built-in providers installed.
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(crate::openai::OpenAiChatProvider::new()));
        registry.register(Arc::new(crate::azure::AzureOpenAiChatProvider::new()));
        registry.register(Arc::new(crate::local::LocalEndpointProvider::new()));

        registry.register_embedding_factory(
            ProviderKind::Openai,
            Arc::new(|reference, options| {
                crate::embeddings::openai_embedding_client(reference, options)
            }),
        );
        registry.register_embedding_factory(
            ProviderKind::AzureOpenai,
            Arc::new(|reference, options| {
                crate::embeddings::azure_embedding_client(reference, options)
            }),
        );
        registry
    }

    /// Install (or replace) a chat provider for its kind.
    pub fn register(&self, provider: Arc<dyn ChatProvider>) {
        let kind = provider.kind();
        tracing::debug!(provider = %kind, "Chat provider registered");
        self.chat_providers.write().insert(kind, provider);
    }

    /// Install (or replace) an embedding factory for a kind.
    pub fn register_embedding_factory(&self, kind: ProviderKind, factory: EmbeddingFactory) {
        self.embedding_factories.write().insert(kind, factory);
    }

    pub fn chat_provider(&self, kind: ProviderKind) -> Option<Arc<dyn ChatProvider>> {
        self.chat_providers.read().get(&kind).cloned()
    }

    /// Resolve a model reference to a chat client.
    pub fn create_client(&self, reference: &ModelReference) -> WorkerResult<Arc<dyn ChatClient>> {
        let provider = self.chat_provider(reference.provider).ok_or_else(|| {
            WorkerError::provider(format!(
                "no chat provider registered for kind '{}'",
                reference.provider
            ))
        })?;

        let supported = provider.supported_models();
        if !supported.is_empty() {
            if let Some(deployment) = &reference.deployment {
                if !supported.contains(deployment) {
                    return Err(WorkerError::provider(format!(
                        "model '{}' not supported by provider '{}'",
                        deployment, reference.provider
                    )));
                }
            }
        }

        provider.create_client(reference)
    }

    /// Resolve a model reference to an embedding client.
    pub fn create_embedding_client(
        &self,
        reference: &ModelReference,
        options: &EmbeddingOptions,
    ) -> WorkerResult<Arc<dyn EmbeddingClient>> {
        let factory = self
            .embedding_factories
            .read()
            .get(&reference.provider)
            .cloned()
            .ok_or_else(|| {
                WorkerError::provider(format!(
                    "no embedding provider registered for kind '{}'",
                    reference.provider
                ))
            })?;
        (*factory)(reference, options)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Collect required env vars, naming every missing variable in one error.
pub fn resolve_required_env(
    reference: &ModelReference,
    required: &[&str],
) -> WorkerResult<HashMap<String, String>> {
    let mut resolved = HashMap::new();
    let mut missing = Vec::new();
    for var in required {
        match reference.env(var) {
            Some(value) if !value.is_empty() => {
                resolved.insert(var.to_string(), value);
            }
            _ => missing.push(*var),
        }
    }
    if missing.is_empty() {
        Ok(resolved)
    } else {
        Err(WorkerError::provider(format!(
            "missing required environment variables: {}",
            missing.join(", ")
        )))
    }
}
