//! Shared test fixtures: a scriptable chat provider and runtime helpers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use maestro_core::{ModelReference, ProviderKind, WorkerResult};
use maestro_providers::{
    ChatClient, ChatProvider, ChatRequest, ChatResponse, EmbeddingClient, ProviderRegistry,
};
use maestro_runtime::Runtime;

/// Scripted behavior: `(deployment, request, global call index) -> response`.
pub type MockBehavior =
    Arc<dyn Fn(&str, &ChatRequest, usize) -> WorkerResult<ChatResponse> + Send + Sync>;

pub struct MockChatProvider {
    behavior: MockBehavior,
    calls: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<(String, ChatRequest)>>>,
}

impl MockChatProvider {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Openai
    }

    fn required_env_vars(&self) -> &'static [&'static str] {
        &[]
    }

    fn create_client(&self, reference: &ModelReference) -> WorkerResult<Arc<dyn ChatClient>> {
        Ok(Arc::new(MockChatClient {
            deployment: reference.deployment.clone().unwrap_or_default(),
            behavior: Arc::clone(&self.behavior),
            calls: Arc::clone(&self.calls),
            requests: Arc::clone(&self.requests),
        }))
    }
}

struct MockChatClient {
    deployment: String,
    behavior: MockBehavior,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<(String, ChatRequest)>>>,
}

impl std::fmt::Debug for MockChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChatClient")
            .field("deployment", &self.deployment)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn generate(&self, request: ChatRequest) -> WorkerResult<ChatResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((self.deployment.clone(), request.clone()));
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        (*self.behavior)(&self.deployment, &request, index)
    }

    fn model_id(&self) -> &str {
        &self.deployment
    }
}

/// Deterministic embedder used by retrieval tests.
pub struct KeywordEmbedder;

#[async_trait]
impl EmbeddingClient for KeywordEmbedder {
    async fn embed_query(&self, text: &str) -> WorkerResult<Vec<f32>> {
        Ok(if text.to_lowercase().contains("rust") {
            vec![1.0, 0.0]
        } else {
            vec![0.0, 1.0]
        })
    }

    async fn embed_documents(&self, texts: &[String]) -> WorkerResult<Vec<Vec<f32>>> {
        let mut out = Vec::new();
        for text in texts {
            out.push(self.embed_query(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> Option<usize> {
        Some(2)
    }
}

/// Runtime whose openai provider is the scripted mock; embedding requests
/// resolve to the keyword embedder.
#[allow(dead_code)]
pub fn mock_runtime(
    behavior: MockBehavior,
) -> (Arc<Runtime>, Arc<Mutex<Vec<(String, ChatRequest)>>>) {
    let providers = Arc::new(ProviderRegistry::empty());
    let provider = MockChatProvider::new(behavior);
    let requests = Arc::clone(&provider.requests);
    providers.register(Arc::new(provider));
    providers.register_embedding_factory(
        ProviderKind::Openai,
        Arc::new(|_reference, _options| Ok(Arc::new(KeywordEmbedder) as Arc<dyn EmbeddingClient>)),
    );

    let runtime = Runtime::builder().with_providers(providers).build();
    (runtime, requests)
}

/// The system prompt of a request, for routing scripted behavior.
#[allow(dead_code)]
pub fn system_text(request: &ChatRequest) -> String {
    request
        .messages
        .iter()
        .find(|m| m.role == maestro_core::Role::System)
        .map(|m| m.text.clone())
        .unwrap_or_default()
}

/// The last user message of a request.
#[allow(dead_code)]
pub fn last_user_text(request: &ChatRequest) -> String {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == maestro_core::Role::User)
        .map(|m| m.text.clone())
        .unwrap_or_default()
}

/// Dummy model reference map entry for configs built in code.
#[allow(dead_code)]
pub fn openai_reference(deployment: &str) -> ModelReference {
    ModelReference {
        provider: ProviderKind::Openai,
        deployment: Some(deployment.to_string()),
        env_vars: HashMap::new(),
        extra: HashMap::new(),
    }
}
