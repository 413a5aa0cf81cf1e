// Maestro RAG - Vector store, retrieval context, and knowledge base
//
// The vector store is one shared value with two roles: the context provider
// reads it, the knowledge base writes it. Both mutate only through the
// VectorStore trait.

pub mod context;
pub mod knowledge;
pub mod store;

pub use context::{Context, ContextProvider, RagContextProvider};
pub use knowledge::{
    KnowledgeBase, KnowledgeBaseState, KnowledgeChunk, KnowledgeCollection, KnowledgeDocument,
};
pub use store::{
    metadata_keys, InMemoryVectorStore, SearchOptions, VectorDocument, VectorMatch, VectorStore,
};
