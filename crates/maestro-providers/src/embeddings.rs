//! Embedding clients mirroring the chat provider structure.
//!
//! Producers normalize vectors to unit length when configured and honour a
//! target dimensionality, warning but not failing on mismatch. Calls retry
//! with exponential backoff on the closed set of transient error kinds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use maestro_core::{ModelReference, WorkerError, WorkerResult};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::registry::resolve_required_env;
use crate::wire;

/// Embedding vector type.
pub type Vector = Vec<f32>;

/// Options applied when constructing an embedding client.
#[derive(Debug, Clone)]
pub struct EmbeddingOptions {
    pub dimensions: Option<usize>,
    pub normalize: bool,
    pub max_retries: u32,
    /// Initial backoff in seconds; doubles per attempt.
    pub retry_backoff: f64,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            dimensions: None,
            normalize: true,
            max_retries: 3,
            retry_backoff: 0.5,
        }
    }
}

/// Asynchronous embedding producer.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Embed a free-form query.
    async fn embed_query(&self, text: &str) -> WorkerResult<Vector>;

    /// Embed a batch of documents.
    async fn embed_documents(&self, texts: &[String]) -> WorkerResult<Vec<Vector>>;

    /// Declared target dimensionality, when known.
    fn dimensions(&self) -> Option<usize>;
}

/// Normalize to unit length when requested; warn on dimension mismatch.
pub fn postprocess_vector(vector: Vec<f32>, options: &EmbeddingOptions) -> Vector {
    if let Some(expected) = options.dimensions {
        if vector.len() != expected {
            debug!(
                actual = vector.len(),
                expected, "Embedding dimension differs from configured target"
            );
        }
    }
    if !options.normalize {
        return vector;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector;
    }
    vector.into_iter().map(|v| v / norm).collect()
}

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    url: String,
    model: String,
    headers: Vec<(String, String)>,
    options: EmbeddingOptions,
}

impl HttpEmbeddingClient {
    pub fn new(
        url: String,
        model: String,
        headers: Vec<(String, String)>,
        options: EmbeddingOptions,
    ) -> WorkerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| {
                WorkerError::provider(format!("failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            http,
            url,
            model,
            headers,
            options,
        })
    }

    async fn request_once(&self, inputs: &[String]) -> WorkerResult<Vec<Vector>> {
        let body = json!({ "model": self.model, "input": inputs });

        let mut request = self.http.post(&self.url).json(&body);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(wire::classify_request_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(wire::classify_request_error)?;
        if !(200..300).contains(&status) {
            return Err(wire::status_error(status, &text));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| WorkerError::model(format!("malformed embeddings response: {}", e)))?;
        let data = value["data"]
            .as_array()
            .ok_or_else(|| WorkerError::model("embeddings response missing 'data'"))?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item["embedding"]
                .as_array()
                .ok_or_else(|| WorkerError::model("embeddings item missing 'embedding'"))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect::<Vec<f32>>();
            vectors.push(postprocess_vector(embedding, &self.options));
        }

        if vectors.len() != inputs.len() {
            warn!(
                returned = vectors.len(),
                requested = inputs.len(),
                "Embedding provider returned a different number of vectors"
            );
        }
        Ok(vectors)
    }

    async fn request_with_retry(&self, inputs: Vec<String>) -> WorkerResult<Vec<Vector>> {
        let mut delay = self.options.retry_backoff;
        let mut last_error = None;

        for attempt in 1..=self.options.max_retries {
            match self.request_once(&inputs).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    let retryable = e.transient_kind().is_some();
                    warn!(
                        attempt,
                        max = self.options.max_retries,
                        error = %e,
                        "Embedding request failed"
                    );
                    last_error = Some(e);
                    if !retryable || attempt == self.options.max_retries {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                    delay *= 2.0;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| WorkerError::model("embedding request failed")))
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed_query(&self, text: &str) -> WorkerResult<Vector> {
        if text.trim().is_empty() {
            return Err(WorkerError::model("query text must not be empty"));
        }
        let vectors = self.request_with_retry(vec![text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| WorkerError::model("embedding provider returned no vectors"))
    }

    async fn embed_documents(&self, texts: &[String]) -> WorkerResult<Vec<Vector>> {
        let payload: Vec<String> = texts
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect();
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        self.request_with_retry(payload).await
    }

    fn dimensions(&self) -> Option<usize> {
        self.options.dimensions
    }
}

/// Embedding factory for the vendor-native provider.
pub fn openai_embedding_client(
    reference: &ModelReference,
    options: &EmbeddingOptions,
) -> WorkerResult<Arc<dyn EmbeddingClient>> {
    let env = resolve_required_env(reference, &["OPENAI_API_KEY"])?;
    let api_key = env["OPENAI_API_KEY"].clone();

    let model = reference
        .deployment
        .clone()
        .unwrap_or_else(|| "text-embedding-3-small".to_string());
    let base_url = reference
        .extra
        .get("endpoint")
        .and_then(|v| v.as_str())
        .unwrap_or("https://api.openai.com/v1")
        .trim_end_matches('/')
        .to_string();

    Ok(Arc::new(HttpEmbeddingClient::new(
        format!("{}/embeddings", base_url),
        model,
        vec![("Authorization".into(), format!("Bearer {}", api_key))],
        options.clone(),
    )?))
}

/// Embedding factory for the enterprise-endpoint provider.
pub fn azure_embedding_client(
    reference: &ModelReference,
    options: &EmbeddingOptions,
) -> WorkerResult<Arc<dyn EmbeddingClient>> {
    let env = resolve_required_env(reference, &["AZURE_OPENAI_ENDPOINT", "AZURE_OPENAI_API_KEY"])?;
    let endpoint = env["AZURE_OPENAI_ENDPOINT"].trim_end_matches('/').to_string();
    let api_key = env["AZURE_OPENAI_API_KEY"].clone();

    let deployment = reference
        .deployment
        .clone()
        .or_else(|| reference.env("AZURE_OPENAI_EMBEDDING_DEPLOYMENT"))
        .ok_or_else(|| {
            WorkerError::provider("azure-openai embedding reference requires 'deployment'")
        })?;

    let api_version = reference
        .env("AZURE_OPENAI_API_VERSION")
        .unwrap_or_else(|| "2024-08-01-preview".to_string());

    let url = format!(
        "{}/openai/deployments/{}/embeddings?api-version={}",
        endpoint, deployment, api_version
    );

    Ok(Arc::new(HttpEmbeddingClient::new(
        url,
        deployment,
        vec![("api-key".into(), api_key)],
        options.clone(),
    )?))
}
