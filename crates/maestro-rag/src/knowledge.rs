//! Knowledge-base catalogue over the persisted layout.
//!
//! The root directory holds `state.json` (collections, documents, embedding
//! signature) and `chunks/<document-id>.json` per ingested document. The
//! vector index is rebuilt from persisted chunks on restart; changing the
//! effective embedding configuration forces a full re-embed before any query
//! is answered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use maestro_core::{ProviderKind, RagConfig, WorkerError, WorkerResult};
use maestro_providers::EmbeddingClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::store::{metadata_keys, VectorDocument, VectorStore};

/// A logical set of documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeCollection {
    pub id: String,
    pub name: String,
    pub namespace: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Signature under which this collection's vectors were generated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_signature: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub document_count: usize,

    #[serde(default)]
    pub chunk_count: usize,
}

/// Metadata of one ingested document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub collection_id: String,
    pub filename: String,
    pub size_bytes: usize,

    /// SHA-like checksum of the content, used for deduplication.
    pub checksum: String,

    #[serde(default = "default_status")]
    pub status: String,

    #[serde(default)]
    pub chunk_count: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_status() -> String {
    "processed".to_string()
}

/// One text chunk ready for indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    pub id: String,
    pub text: String,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Persisted catalogue (`state.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBaseState {
    #[serde(default)]
    pub collections: HashMap<String, KnowledgeCollection>,

    #[serde(default)]
    pub documents: HashMap<String, KnowledgeDocument>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_signature: Option<String>,
}

/// Knowledge-base service: the writer role over the shared vector store.
pub struct KnowledgeBase {
    root: PathBuf,
    store: Arc<dyn VectorStore>,
    state: RwLock<KnowledgeBaseState>,
    embeddings: RwLock<Option<Arc<dyn EmbeddingClient>>>,
}

impl KnowledgeBase {
    /// Open (or initialize) a knowledge base rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>, store: Arc<dyn VectorStore>) -> WorkerResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("chunks")).await?;

        let state_path = root.join("state.json");
        let state = if state_path.exists() {
            let content = tokio::fs::read_to_string(&state_path).await?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(error = %e, "Corrupt state.json; starting from an empty catalogue");
                KnowledgeBaseState::default()
            })
        } else {
            KnowledgeBaseState::default()
        };

        Ok(Self {
            root,
            store,
            state: RwLock::new(state),
            embeddings: RwLock::new(None),
        })
    }

    /// Install the embedding client used for (re)indexing.
    pub async fn set_embedding_client(&self, client: Arc<dyn EmbeddingClient>) {
        *self.embeddings.write().await = Some(client);
    }

    pub async fn state_snapshot(&self) -> KnowledgeBaseState {
        self.state.read().await.clone()
    }

    pub async fn collection(&self, id: &str) -> Option<KnowledgeCollection> {
        self.state.read().await.collections.get(id).cloned()
    }

    pub async fn create_collection(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> WorkerResult<KnowledgeCollection> {
        let id = id.into();
        let now = Utc::now();
        let collection = KnowledgeCollection {
            id: id.clone(),
            name: name.into(),
            namespace: namespace.into(),
            description: None,
            tags: Vec::new(),
            embedding_signature: self.state.read().await.embedding_signature.clone(),
            created_at: now,
            updated_at: now,
            document_count: 0,
            chunk_count: 0,
        };

        {
            let mut state = self.state.write().await;
            if state.collections.contains_key(&id) {
                return Err(WorkerError::config(format!(
                    "collection '{}' already exists",
                    id
                )));
            }
            state.collections.insert(id.clone(), collection.clone());
        }
        self.persist_state().await?;
        info!(collection = %id, "Knowledge collection created");
        Ok(collection)
    }

    /// Ingest a document's chunks: embed, persist, and index them.
    pub async fn add_document(
        &self,
        collection_id: &str,
        filename: &str,
        chunks: Vec<KnowledgeChunk>,
    ) -> WorkerResult<KnowledgeDocument> {
        let collection = self.collection(collection_id).await.ok_or_else(|| {
            WorkerError::reference(format!("collection '{}' not found", collection_id))
        })?;

        let embeddings = self.require_embeddings().await?;
        let document_id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let size_bytes: usize = chunks.iter().map(|c| c.text.len()).sum();
        let checksum = content_checksum(&chunks);

        // Embed every chunk up front so a failure leaves no partial index.
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embeddings.embed_documents(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(WorkerError::model(format!(
                "embedding provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let mut stored_chunks = Vec::with_capacity(chunks.len());
        let mut vector_docs = Vec::with_capacity(chunks.len());
        for (index, (mut chunk, vector)) in chunks.into_iter().zip(vectors).enumerate() {
            chunk.embedding = Some(vector.clone());
            chunk
                .metadata
                .insert(metadata_keys::COLLECTION_ID.into(), Value::String(collection_id.into()));
            chunk
                .metadata
                .insert(metadata_keys::DOCUMENT_ID.into(), Value::String(document_id.clone()));
            chunk
                .metadata
                .insert(metadata_keys::CHUNK_INDEX.into(), Value::from(index));
            chunk
                .metadata
                .entry(metadata_keys::SOURCE.into())
                .or_insert_with(|| Value::String(filename.to_string()));

            vector_docs.push(VectorDocument {
                id: chunk.id.clone(),
                text: chunk.text.clone(),
                embedding: Some(vector),
                metadata: chunk.metadata.clone(),
                namespace: collection.namespace.clone(),
            });
            stored_chunks.push(chunk);
        }

        let chunk_count = stored_chunks.len();
        self.write_chunks(&document_id, &stored_chunks).await?;
        self.store.add_documents(vector_docs).await?;

        let document = KnowledgeDocument {
            id: document_id.clone(),
            collection_id: collection_id.to_string(),
            filename: filename.to_string(),
            size_bytes,
            checksum,
            status: default_status(),
            chunk_count,
            error: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        };

        {
            let mut state = self.state.write().await;
            state.documents.insert(document_id.clone(), document.clone());
            if let Some(entry) = state.collections.get_mut(collection_id) {
                entry.document_count += 1;
                entry.chunk_count += chunk_count;
                entry.updated_at = now;
            }
        }
        self.persist_state().await?;

        info!(document = %document_id, collection = %collection_id, chunks = chunk_count, "Document indexed");
        Ok(document)
    }

    /// Align the store with a (possibly new) embedding configuration.
    ///
    /// An unchanged signature rebuilds the index from persisted chunk
    /// embeddings (the restart path); a changed signature clears the store,
    /// re-embeds every chunk, and updates the persisted signature.
    pub async fn sync_with_config(
        &self,
        config: &RagConfig,
        provider: ProviderKind,
    ) -> WorkerResult<()> {
        if !config.enabled {
            debug!("RAG disabled; skipping knowledge sync");
            return Ok(());
        }

        let signature = config.embedding_signature(&provider);
        let persisted = self.state.read().await.embedding_signature.clone();

        if persisted.as_deref() == Some(signature.as_str()) {
            self.rebuild_vector_index(false).await
        } else {
            if persisted.is_some() {
                info!(
                    old = persisted.as_deref().unwrap_or(""),
                    new = %signature,
                    "Embedding signature changed; forcing re-embed"
                );
            }
            {
                let mut state = self.state.write().await;
                state.embedding_signature = Some(signature.clone());
                for collection in state.collections.values_mut() {
                    collection.embedding_signature = Some(signature.clone());
                }
            }
            self.rebuild_vector_index(true).await?;
            self.persist_state().await
        }
    }

    /// Rebuild the vector index from persisted chunks.
    pub async fn rebuild_vector_index(&self, force_reembed: bool) -> WorkerResult<()> {
        let documents: Vec<KnowledgeDocument> = {
            let state = self.state.read().await;
            state.documents.values().cloned().collect()
        };
        if documents.is_empty() {
            return Ok(());
        }

        self.store.clear(None).await?;

        let collections = self.state.read().await.collections.clone();
        for document in documents {
            let mut chunks = self.read_chunks(&document.id).await?;

            if force_reembed || chunks.iter().any(|c| c.embedding.is_none()) {
                let embeddings = self.require_embeddings().await?;
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                let vectors = embeddings.embed_documents(&texts).await?;
                for (chunk, vector) in chunks.iter_mut().zip(vectors) {
                    chunk.embedding = Some(vector);
                }
                self.write_chunks(&document.id, &chunks).await?;
            }

            let namespace = collections
                .get(&document.collection_id)
                .map(|c| c.namespace.clone())
                .unwrap_or_else(|| "default".to_string());

            let vector_docs: Vec<VectorDocument> = chunks
                .into_iter()
                .map(|chunk| VectorDocument {
                    id: chunk.id.clone(),
                    text: chunk.text,
                    embedding: chunk.embedding,
                    metadata: chunk.metadata,
                    namespace: namespace.clone(),
                })
                .collect();
            self.store.add_documents(vector_docs).await?;
        }

        debug!(force_reembed, "Vector index rebuilt");
        Ok(())
    }

    async fn require_embeddings(&self) -> WorkerResult<Arc<dyn EmbeddingClient>> {
        self.embeddings.read().await.clone().ok_or_else(|| {
            WorkerError::provider("no embedding client configured for the knowledge base")
        })
    }

    fn chunks_path(&self, document_id: &str) -> PathBuf {
        self.root.join("chunks").join(format!("{}.json", document_id))
    }

    async fn write_chunks(&self, document_id: &str, chunks: &[KnowledgeChunk]) -> WorkerResult<()> {
        let content = serde_json::to_string_pretty(chunks)?;
        tokio::fs::write(self.chunks_path(document_id), content).await?;
        Ok(())
    }

    async fn read_chunks(&self, document_id: &str) -> WorkerResult<Vec<KnowledgeChunk>> {
        let path = self.chunks_path(document_id);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            WorkerError::config(format!("failed to read chunks for '{}': {}", document_id, e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn persist_state(&self) -> WorkerResult<()> {
        let state = self.state.read().await;
        let content = serde_json::to_string_pretty(&*state)?;
        tokio::fs::write(self.root.join("state.json"), content).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

// FNV-1a over chunk texts; stable and dependency-free.
fn content_checksum(chunks: &[KnowledgeChunk]) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for chunk in chunks {
        for byte in chunk.text.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    format!("{:016x}", hash)
}
