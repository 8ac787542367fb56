use serde::{Deserialize, Serialize};

use crate::error::ShimError;

/// Applied when the client sends no `max_tokens`, or a value of zero or below.
pub const DEFAULT_MAX_TOKENS: i64 = 1024;

/// Chat completion request as sent by LM Studio-style clients.
///
/// `keep_alive`, `format`, `tools` and `options` are accepted so that clients
/// sending them are not rejected, but they are never forwarded upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub keep_alive: Option<serde_json::Value>,
    #[serde(default)]
    pub format: Option<serde_json::Value>,
    #[serde(default)]
    pub tools: Option<serde_json::Value>,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

/// A role-tagged chat message. `content` may be a string or an array of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<serde_json::Value>>,
}

/// Request body sent to the provider's streaming chat completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    pub max_tokens: i64,
    pub stream: bool,
}

/// Decode a client request body.
///
/// # Errors
///
/// Returns [`ShimError::InvalidRequest`] when the body is not valid JSON or
/// does not match the request shape.
pub fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, ShimError> {
    serde_json::from_slice(body)
        .map_err(|e| ShimError::InvalidRequest(format!("Invalid chat request body: {e}")))
}
