//! Chat client contract and request/response types.

use async_trait::async_trait;
use maestro_core::{ChatMessage, WorkerResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other,
}

/// Token usage for a single call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Incremental text delta produced while streaming.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub delta: String,
}

/// A chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,

    /// Function declarations advertised to the model.
    pub tools: Vec<Value>,

    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<Value>) -> Self {
        self.tools = tools;
        self
    }
}

/// A chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub usage: Usage,
    pub stop_reason: StopReason,
}

impl ChatResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message: ChatMessage::assistant(text),
            usage: Usage::default(),
            stop_reason: StopReason::EndTurn,
        }
    }
}

/// Vendor-agnostic chat client.
#[async_trait]
pub trait ChatClient: Send + Sync + std::fmt::Debug {
    /// Run a completion to the end.
    async fn generate(&self, request: ChatRequest) -> WorkerResult<ChatResponse>;

    /// Run a completion, forwarding text deltas through `tx` as they arrive.
    ///
    /// The default implementation performs a blocking completion and forwards
    /// the full text as a single chunk.
    async fn generate_stream(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamChunk>,
    ) -> WorkerResult<ChatResponse> {
        let response = self.generate(request).await?;
        if !response.message.text.is_empty() {
            let _ = tx
                .send(StreamChunk {
                    delta: response.message.text.clone(),
                })
                .await;
        }
        Ok(response)
    }

    /// Model or deployment id served by this client.
    fn model_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug)]
    struct EchoClient;

    #[async_trait]
    impl ChatClient for EchoClient {
        async fn generate(&self, request: ChatRequest) -> WorkerResult<ChatResponse> {
            let last = request
                .messages
                .last()
                .map(|m| m.text.clone())
                .unwrap_or_default();
            Ok(ChatResponse::text(last))
        }

        fn model_id(&self) -> &str {
            "echo"
        }
    }

    #[tokio::test]
    async fn test_default_stream_forwards_single_chunk() {
        let client = Arc::new(EchoClient);
        let (tx, mut rx) = mpsc::channel(8);

        let request = ChatRequest::new(vec![ChatMessage::user("hello")]);
        let response = client.generate_stream(request, tx).await.unwrap();
        assert_eq!(response.message.text, "hello");

        let chunk = rx.recv().await.unwrap();
        assert_eq!(chunk.delta, "hello");
        assert!(rx.recv().await.is_none());
    }
}
