//! Runtime context object.
//!
//! One `Runtime` value owns the registries and the event bus; every
//! component receives it at build time. There is no module-level singleton:
//! tests instantiate their own runtime.

use std::collections::HashMap;
use std::sync::Arc;

use maestro_core::EventBus;
use maestro_providers::ProviderRegistry;
use maestro_rag::{InMemoryVectorStore, VectorStore};
use maestro_tools::ToolRegistry;
use parking_lot::RwLock;

use crate::middleware::AgentMiddleware;
use crate::strategies::StrategyRegistry;

pub struct Runtime {
    pub bus: Arc<EventBus>,
    pub providers: Arc<ProviderRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub strategies: Arc<StrategyRegistry>,
    pub vector_store: Arc<dyn VectorStore>,
    middleware: RwLock<HashMap<String, Arc<dyn AgentMiddleware>>>,
}

impl Runtime {
    /// Runtime with default registries and an in-memory vector store.
    pub fn new() -> Arc<Self> {
        RuntimeBuilder::default().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Register a named middleware referencable from agent definitions.
    pub fn register_middleware(&self, name: impl Into<String>, middleware: Arc<dyn AgentMiddleware>) {
        self.middleware.write().insert(name.into(), middleware);
    }

    pub fn middleware(&self, name: &str) -> Option<Arc<dyn AgentMiddleware>> {
        self.middleware.read().get(name).cloned()
    }
}

/// Builder for runtimes with custom parts (mock providers, shared stores).
#[derive(Default)]
pub struct RuntimeBuilder {
    bus: Option<Arc<EventBus>>,
    providers: Option<Arc<ProviderRegistry>>,
    strategies: Option<Arc<StrategyRegistry>>,
    vector_store: Option<Arc<dyn VectorStore>>,
}

impl RuntimeBuilder {
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_providers(mut self, providers: Arc<ProviderRegistry>) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn with_strategies(mut self, strategies: Arc<StrategyRegistry>) -> Self {
        self.strategies = Some(strategies);
        self
    }

    pub fn with_vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    pub fn build(self) -> Arc<Runtime> {
        let bus = self.bus.unwrap_or_else(|| Arc::new(EventBus::new()));
        Arc::new(Runtime {
            tools: Arc::new(ToolRegistry::new(Arc::clone(&bus))),
            providers: self
                .providers
                .unwrap_or_else(|| Arc::new(ProviderRegistry::with_defaults())),
            strategies: self
                .strategies
                .unwrap_or_else(|| Arc::new(StrategyRegistry::with_defaults())),
            vector_store: self
                .vector_store
                .unwrap_or_else(|| Arc::new(InMemoryVectorStore::new())),
            middleware: RwLock::new(HashMap::new()),
            bus,
        })
    }
}
