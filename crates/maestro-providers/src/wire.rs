//! OpenAI-compatible wire format shared by the built-in providers.

use maestro_core::{ChatMessage, Role, ToolCall, TransientErrorKind, WorkerError, WorkerResult};
use serde_json::{json, Value};

use crate::chat::{ChatRequest, ChatResponse, StopReason, Usage};

/// Serialize a conversation into wire messages.
pub fn to_wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let mut wire = json!({ "role": role, "content": msg.text });
            if let Some(name) = &msg.author_name {
                wire["name"] = json!(sanitize_name(name));
            }
            if let Some(call_id) = &msg.tool_call_id {
                wire["tool_call_id"] = json!(call_id);
            }
            if !msg.tool_calls.is_empty() {
                wire["tool_calls"] = Value::Array(
                    msg.tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                },
                            })
                        })
                        .collect(),
                );
            }
            wire
        })
        .collect()
}

/// Build a chat-completions request body.
pub fn to_request_body(model: &str, request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": model,
        "messages": to_wire_messages(&request.messages),
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.clone());
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    body
}

/// Parse a chat-completions response body.
pub fn parse_response(body: &Value) -> WorkerResult<ChatResponse> {
    let choice = body["choices"]
        .get(0)
        .ok_or_else(|| WorkerError::model("response contained no choices"))?;
    let wire_message = &choice["message"];

    let text = wire_message["content"].as_str().unwrap_or_default().to_string();
    let mut message = ChatMessage::assistant(text);

    if let Some(calls) = wire_message["tool_calls"].as_array() {
        for call in calls {
            let arguments = call["function"]["arguments"]
                .as_str()
                .map(|raw| serde_json::from_str(raw).unwrap_or(Value::Null))
                .unwrap_or(Value::Null);
            message.tool_calls.push(ToolCall {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                arguments,
            });
        }
    }

    let stop_reason = match choice["finish_reason"].as_str() {
        Some("stop") => StopReason::EndTurn,
        Some("tool_calls") => StopReason::ToolUse,
        Some("length") => StopReason::MaxTokens,
        _ => StopReason::Other,
    };

    let usage = Usage {
        input_tokens: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
        output_tokens: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as usize,
    };

    Ok(ChatResponse {
        message,
        usage,
        stop_reason,
    })
}

/// Classify an HTTP status for retry purposes.
pub fn classify_status(status: u16) -> Option<TransientErrorKind> {
    match status {
        429 => Some(TransientErrorKind::RateLimited),
        500..=599 => Some(TransientErrorKind::TransientStatus),
        _ => None,
    }
}

/// Map a reqwest failure onto the model error kind.
pub fn classify_request_error(err: reqwest::Error) -> WorkerError {
    if err.is_timeout() {
        WorkerError::model_transient(err.to_string(), TransientErrorKind::Timeout)
    } else if err.is_connect() {
        WorkerError::model_transient(err.to_string(), TransientErrorKind::Connection)
    } else {
        WorkerError::model(err.to_string())
    }
}

/// Map a non-success HTTP response onto the model error kind.
pub fn status_error(status: u16, body: &str) -> WorkerError {
    let message = format!("HTTP {}: {}", status, truncate(body, 300));
    match classify_status(status) {
        Some(kind) => WorkerError::model_transient(message, kind),
        None => WorkerError::model(message),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// Vendor APIs restrict participant names to [A-Za-z0-9_-].
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
