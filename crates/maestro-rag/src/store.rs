//! Vector store contract and in-memory implementation.
//!
//! Similarity is cosine over unit-normalized vectors; unnormalized input is
//! normalized defensively at query time. Metadata filters support scalar
//! equality, list intersection, and `$in` membership; a filter key absent
//! from a document's metadata rejects that document.

use std::collections::HashMap;

use async_trait::async_trait;
use maestro_core::{WorkerError, WorkerResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// Reserved metadata keys used by the knowledge base.
pub mod metadata_keys {
    pub const COLLECTION_ID: &str = "collection_id";
    pub const DOCUMENT_ID: &str = "document_id";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const SOURCE: &str = "source";
}

/// A document stored in (or destined for) the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorDocument {
    pub id: String,
    pub text: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

/// One similarity-search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub document_id: String,
    pub content: String,
    pub score: f32,
    pub metadata: HashMap<String, Value>,
    pub namespace: String,
}

/// Parameters for a similarity search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub top_k: usize,
    pub score_threshold: Option<f32>,
    /// Target namespace; `None` means "default", `Some("*")` means all.
    pub namespace: Option<String>,
    pub metadata_filters: Option<HashMap<String, Value>>,
}

/// Shared vector store role: the RAG runtime reads, the knowledge base writes.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Persist documents. Every document must carry an embedding, and its
    /// dimension must agree with documents already stored in the namespace.
    async fn add_documents(&self, documents: Vec<VectorDocument>) -> WorkerResult<()>;

    async fn similarity_search(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> WorkerResult<Vec<VectorMatch>>;

    /// Drop one namespace, or everything when `None`.
    async fn clear(&self, namespace: Option<&str>) -> WorkerResult<()>;
}

#[derive(Debug, Clone)]
struct StoredDocument {
    document_id: String,
    content: String,
    metadata: HashMap<String, Value>,
    vector: Vec<f32>,
    namespace: String,
}

/// In-memory vector store.
pub struct InMemoryVectorStore {
    normalize: bool,
    namespaces: RwLock<HashMap<String, Vec<StoredDocument>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::with_normalization(true)
    }

    pub fn with_normalization(normalize: bool) -> Self {
        Self {
            normalize,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    fn normalize_vector(&self, vector: &[f32]) -> Vec<f32> {
        if !self.normalize {
            return vector.to_vec();
        }
        normalize(vector)
    }

    /// Snapshot a namespace, for debugging and rebuild verification.
    pub async fn export_namespace(&self, namespace: Option<&str>) -> Vec<VectorDocument> {
        let namespaces = self.namespaces.read().await;
        let ns = namespace.unwrap_or("default");
        let docs: Vec<&StoredDocument> = if ns == "*" {
            namespaces.values().flatten().collect()
        } else {
            namespaces.get(ns).map(|d| d.iter().collect()).unwrap_or_default()
        };

        docs.into_iter()
            .map(|stored| VectorDocument {
                id: stored.document_id.clone(),
                text: stored.content.clone(),
                embedding: Some(stored.vector.clone()),
                metadata: stored.metadata.clone(),
                namespace: stored.namespace.clone(),
            })
            .collect()
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn add_documents(&self, documents: Vec<VectorDocument>) -> WorkerResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let mut namespaces = self.namespaces.write().await;
        for doc in documents {
            let Some(embedding) = &doc.embedding else {
                return Err(WorkerError::tool_validation(format!(
                    "document '{}' has no embedding",
                    doc.id
                )));
            };

            let namespace = if doc.namespace.is_empty() {
                "default".to_string()
            } else {
                doc.namespace.clone()
            };

            let existing = namespaces.entry(namespace.clone()).or_default();
            if let Some(first) = existing.first() {
                if first.vector.len() != embedding.len() {
                    return Err(WorkerError::embedding_mismatch(format!(
                        "document '{}' has dimension {} but namespace '{}' holds {}",
                        doc.id,
                        embedding.len(),
                        namespace,
                        first.vector.len()
                    )));
                }
            }

            let vector = self.normalize_vector(embedding);
            debug!(document = %doc.id, namespace = %namespace, "Document stored");
            existing.push(StoredDocument {
                document_id: doc.id,
                content: doc.text,
                metadata: doc.metadata,
                vector,
                namespace,
            });
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> WorkerResult<Vec<VectorMatch>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = normalize(query);
        let ns = options.namespace.as_deref().unwrap_or("default");

        let candidates: Vec<StoredDocument> = {
            let namespaces = self.namespaces.read().await;
            if ns == "*" {
                namespaces.values().flatten().cloned().collect()
            } else {
                namespaces.get(ns).cloned().unwrap_or_default()
            }
        };

        let mut matches = Vec::new();
        for stored in &candidates {
            if let Some(filters) = &options.metadata_filters {
                if !metadata_matches(&stored.metadata, filters) {
                    continue;
                }
            }
            let score = cosine_similarity(&query_vector, &stored.vector);
            if let Some(threshold) = options.score_threshold {
                if score < threshold {
                    continue;
                }
            }
            matches.push(VectorMatch {
                document_id: stored.document_id.clone(),
                content: stored.content.clone(),
                score,
                metadata: stored.metadata.clone(),
                namespace: if ns == "*" {
                    stored.namespace.clone()
                } else {
                    ns.to_string()
                },
            });
        }

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(options.top_k);
        Ok(matches)
    }

    async fn clear(&self, namespace: Option<&str>) -> WorkerResult<()> {
        let mut namespaces = self.namespaces.write().await;
        match namespace {
            Some(ns) => {
                namespaces.remove(ns);
            }
            None => namespaces.clear(),
        }
        Ok(())
    }
}

fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        debug!(a = a.len(), b = b.len(), "Vectors have different dimensions");
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::MIN_POSITIVE);
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt().max(f32::MIN_POSITIVE);
    dot / (norm_a * norm_b)
}

/// Filter semantics: equality for scalars, intersection for list-valued
/// fields, `$in` membership. Missing keys reject the document.
fn metadata_matches(metadata: &HashMap<String, Value>, filters: &HashMap<String, Value>) -> bool {
    for (key, expected) in filters {
        let Some(value) = metadata.get(key) else {
            return false;
        };

        match expected {
            Value::Object(operator) => {
                if let Some(allowed) = operator.get("$in").and_then(|v| v.as_array()) {
                    match value {
                        Value::Array(items) => {
                            if !items.iter().any(|item| allowed.contains(item)) {
                                return false;
                            }
                        }
                        scalar => {
                            if !allowed.contains(scalar) {
                                return false;
                            }
                        }
                    }
                } else if value != expected {
                    return false;
                }
            }
            Value::Array(expected_items) => match value {
                Value::Array(items) => {
                    if !items.iter().any(|item| expected_items.contains(item)) {
                        return false;
                    }
                }
                scalar => {
                    if !expected_items.contains(scalar) {
                        return false;
                    }
                }
            },
            scalar => match value {
                Value::Array(items) => {
                    if !items.contains(scalar) {
                        return false;
                    }
                }
                other => {
                    if other != scalar {
                        return false;
                    }
                }
            },
        }
    }
    true
}
