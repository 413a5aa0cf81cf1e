//! Shared chat client for OpenAI-compatible endpoints.

use std::time::Duration;

use async_trait::async_trait;
use maestro_core::WorkerResult;
use tracing::debug;

use crate::chat::{ChatClient, ChatRequest, ChatResponse};
use crate::wire;

/// Chat client speaking the OpenAI chat-completions wire format.
///
/// Used by every built-in provider; they differ only in endpoint shape and
/// auth headers.
#[derive(Debug)]
pub struct HttpChatClient {
    http: reqwest::Client,
    url: String,
    model: String,
    headers: Vec<(String, String)>,
}

impl HttpChatClient {
    pub fn new(
        url: String,
        model: String,
        headers: Vec<(String, String)>,
        timeout_secs: u64,
    ) -> WorkerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| {
                maestro_core::WorkerError::provider(format!("failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            http,
            url,
            model,
            headers,
        })
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn generate(&self, request: ChatRequest) -> WorkerResult<ChatResponse> {
        let body = wire::to_request_body(&self.model, &request);
        debug!(model = %self.model, messages = request.messages.len(), "Chat completion request");

        let mut http_request = self.http.post(&self.url).json(&body);
        for (key, value) in &self.headers {
            http_request = http_request.header(key.as_str(), value.as_str());
        }

        let response = http_request
            .send()
            .await
            .map_err(wire::classify_request_error)?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(wire::classify_request_error)?;
        if !(200..300).contains(&status) {
            return Err(wire::status_error(status, &text));
        }

        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| maestro_core::WorkerError::model(format!("malformed response: {}", e)))?;
        wire::parse_response(&value)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
