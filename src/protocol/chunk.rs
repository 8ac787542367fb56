use serde::{Deserialize, Serialize};

pub const STOP_FINISH_REASON: &str = "stop";

/// One streaming chat completion event.
///
/// Only the fields the translator touches are typed; everything else the
/// provider sends (`provider`, `system_fingerprint`, `usage`, ...) rides along
/// in `extra` and is re-emitted verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A choice within a chunk. `finish_reason` and `logprobs` always serialize,
/// as `null` when unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub logprobs: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Incremental content of a choice. An empty delta serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChunkDelta {
    /// `true` when `content` is a non-empty string. Absent, `null` and `""`
    /// all count as no content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.content.as_deref().is_some_and(|content| !content.is_empty())
    }
}

impl ChatCompletionChunk {
    /// In-band provider error payload (`{"error": {...}}`), if this event carries one.
    #[must_use]
    pub fn provider_error(&self) -> Option<&serde_json::Value> {
        self.extra.get("error")
    }

    /// Whether the first choice's delta carries no content, i.e. the event is a pure finish signal.
    #[must_use]
    pub fn is_content_free(&self) -> bool {
        self.choices
            .first()
            .is_some_and(|choice| !choice.delta.has_content())
    }

    /// Rewrite the first choice into a clean terminal event: empty delta, `finish_reason: "stop"`.
    pub fn mark_stopped(&mut self) {
        if let Some(choice) = self.choices.first_mut() {
            choice.delta = ChunkDelta::default();
            choice.finish_reason = Some(STOP_FINISH_REASON.to_string());
        }
    }
}
