// Maestro Providers - Multi-provider chat and embedding abstraction
//
// Resolves model references to chat clients and embedding clients, hiding
// vendor-specific construction behind the provider registry.

pub mod azure;
pub mod chat;
pub mod embeddings;
pub mod http_client;
pub mod local;
pub mod openai;
pub mod registry;
pub mod wire;

pub use azure::AzureOpenAiChatProvider;
pub use chat::{ChatClient, ChatRequest, ChatResponse, StopReason, StreamChunk, Usage};
pub use embeddings::{
    azure_embedding_client, openai_embedding_client, EmbeddingClient, EmbeddingOptions,
    HttpEmbeddingClient, Vector,
};
pub use http_client::HttpChatClient;
pub use local::LocalEndpointProvider;
pub use openai::OpenAiChatProvider;
pub use registry::{resolve_required_env, ChatProvider, EmbeddingFactory, ProviderRegistry};
