//! Pre-invocation context provider backed by the vector store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use maestro_core::{ChatMessage, RagStrategy, Role, WorkerResult};
use maestro_providers::EmbeddingClient;
use serde_json::Value;
use tracing::debug;

use crate::store::{metadata_keys, SearchOptions, VectorMatch, VectorStore};

/// Messages prepended to an agent's input.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub messages: Vec<ChatMessage>,
}

impl Context {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Pre-invocation hook that prepends messages to an agent's input.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn invoking(&self, messages: &[ChatMessage]) -> WorkerResult<Context>;
}

/// Retrieval-augmented context provider.
///
/// Builds a query from the conversation, embeds it, searches the store, and
/// returns the fixed instruction message followed by one message per match.
pub struct RagContextProvider {
    store: Arc<dyn VectorStore>,
    embeddings: Arc<dyn EmbeddingClient>,
    top_k: usize,
    min_score: Option<f32>,
    strategy: RagStrategy,
    context_prompt: String,
    namespace: String,
    metadata_filters: Option<HashMap<String, Value>>,
}

impl RagContextProvider {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embeddings: Arc<dyn EmbeddingClient>,
        top_k: usize,
        min_score: Option<f32>,
        strategy: RagStrategy,
        context_prompt: impl Into<String>,
        namespace: impl Into<String>,
        metadata_filters: Option<HashMap<String, Value>>,
    ) -> Self {
        Self {
            store,
            embeddings,
            top_k,
            min_score,
            strategy,
            context_prompt: context_prompt.into(),
            namespace: namespace.into(),
            metadata_filters,
        }
    }

    /// Restrict matches to a set of collections.
    pub fn collection_filter(collections: &[String]) -> HashMap<String, Value> {
        let mut filters = HashMap::new();
        filters.insert(
            metadata_keys::COLLECTION_ID.to_string(),
            serde_json::json!({"$in": collections}),
        );
        filters
    }

    fn build_query(&self, messages: &[ChatMessage]) -> String {
        match self.strategy {
            RagStrategy::Conversation => messages
                .iter()
                .map(|m| m.text.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            RagStrategy::LastMessage => {
                for msg in messages.iter().rev() {
                    if msg.role == Role::User && !msg.text.trim().is_empty() {
                        return msg.text.trim().to_string();
                    }
                }
                messages
                    .last()
                    .map(|m| m.text.trim().to_string())
                    .unwrap_or_default()
            }
        }
    }

    fn format_match(index: usize, matched: &VectorMatch) -> String {
        let source = matched
            .metadata
            .get(metadata_keys::SOURCE)
            .or_else(|| matched.metadata.get("path"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| matched.document_id.clone());

        let chunk = matched.content.trim();
        let chunk = if chunk.is_empty() { "(empty chunk)" } else { chunk };
        format!("[{}] {} (score={:.3})\n{}", index, source, matched.score, chunk)
    }
}

#[async_trait]
impl ContextProvider for RagContextProvider {
    async fn invoking(&self, messages: &[ChatMessage]) -> WorkerResult<Context> {
        let relevant: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| {
                !m.text.trim().is_empty() && matches!(m.role, Role::User | Role::Assistant)
            })
            .collect();
        if relevant.is_empty() {
            return Ok(Context::default());
        }

        let owned: Vec<ChatMessage> = relevant.into_iter().cloned().collect();
        let query = self.build_query(&owned);
        if query.is_empty() {
            return Ok(Context::default());
        }

        let embed_start = Instant::now();
        let query_vector = self.embeddings.embed_query(&query).await?;
        let embed_ms = embed_start.elapsed().as_secs_f64() * 1000.0;

        let search_start = Instant::now();
        let matches = self
            .store
            .similarity_search(
                &query_vector,
                &SearchOptions {
                    top_k: self.top_k,
                    score_threshold: self.min_score,
                    namespace: Some(self.namespace.clone()),
                    metadata_filters: self.metadata_filters.clone(),
                },
            )
            .await?;
        let search_ms = search_start.elapsed().as_secs_f64() * 1000.0;

        if matches.is_empty() {
            debug!("No retrieval context for the current query");
            return Ok(Context::default());
        }

        debug!(
            matches = matches.len(),
            embed_ms, search_ms, "Retrieval context assembled"
        );

        let mut context_messages = vec![ChatMessage::user(self.context_prompt.clone())];
        context_messages.extend(
            matches
                .iter()
                .enumerate()
                .map(|(idx, matched)| ChatMessage::user(Self::format_match(idx + 1, matched))),
        );
        Ok(Context {
            messages: context_messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryVectorStore, VectorDocument};
    use maestro_core::WorkerError;

    /// Deterministic embedder: maps known phrases onto fixed unit vectors.
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingClient for KeywordEmbedder {
        async fn embed_query(&self, text: &str) -> WorkerResult<Vec<f32>> {
            if text.trim().is_empty() {
                return Err(WorkerError::model("empty query"));
            }
            Ok(if text.contains("rust") {
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

    async fn seeded_store() -> Arc<InMemoryVectorStore> {
        let store = Arc::new(InMemoryVectorStore::new());
        let mut metadata = HashMap::new();
        metadata.insert("collection_id".to_string(), serde_json::json!("c1"));
        metadata.insert("source".to_string(), serde_json::json!("guide.md"));
        store
            .add_documents(vec![VectorDocument {
                id: "doc-1".to_string(),
                text: "rust ownership rules".to_string(),
                embedding: Some(vec![1.0, 0.0]),
                metadata,
                namespace: "default".to_string(),
            }])
            .await
            .unwrap();
        store
    }

    fn provider(
        store: Arc<InMemoryVectorStore>,
        filters: Option<HashMap<String, Value>>,
    ) -> RagContextProvider {
        RagContextProvider::new(
            store,
            Arc::new(KeywordEmbedder),
            1,
            Some(0.0),
            RagStrategy::LastMessage,
            "Relevant context:",
            "default",
            filters,
        )
    }

    #[tokio::test]
    async fn test_injects_formatted_context() {
        let store = seeded_store().await;
        let provider = provider(store, None);

        let context = provider
            .invoking(&[ChatMessage::user("tell me about rust")])
            .await
            .unwrap();

        assert_eq!(context.messages.len(), 2);
        assert_eq!(context.messages[0].text, "Relevant context:");
        assert!(context.messages[1].text.starts_with("[1] guide.md (score="));
        assert!(context.messages[1].text.contains("rust ownership rules"));
    }

    #[tokio::test]
    async fn test_empty_input_yields_empty_context() {
        let store = seeded_store().await;
        let provider = provider(store, None);

        let context = provider.invoking(&[]).await.unwrap();
        assert!(context.is_empty());

        let context = provider
            .invoking(&[ChatMessage::user("   ")])
            .await
            .unwrap();
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_collection_filter_excludes_other_collections() {
        let store = seeded_store().await;
        let filters = RagContextProvider::collection_filter(&["c2".to_string()]);
        let provider = provider(store, Some(filters));

        let context = provider
            .invoking(&[ChatMessage::user("tell me about rust")])
            .await
            .unwrap();
        assert!(context.is_empty());
    }

    #[tokio::test]
    async fn test_conversation_strategy_concatenates() {
        let store = seeded_store().await;
        let provider = RagContextProvider::new(
            store,
            Arc::new(KeywordEmbedder),
            1,
            None,
            RagStrategy::Conversation,
            "Relevant context:",
            "default",
            None,
        );

        let context = provider
            .invoking(&[
                ChatMessage::user("question about rust"),
                ChatMessage::assistant("sure"),
                ChatMessage::user("more detail please"),
            ])
            .await
            .unwrap();
        // Conversation query contains "rust", so the document is found.
        assert_eq!(context.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_system_messages_are_ignored() {
        let store = seeded_store().await;
        let provider = provider(store, None);

        let context = provider
            .invoking(&[ChatMessage::system("you are helpful")])
            .await
            .unwrap();
        assert!(context.is_empty());
    }
}
