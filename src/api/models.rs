use axum::response::Json;
use serde::Serialize;

use crate::config::CANONICAL_MODEL_ID;
use crate::util::unix_now_secs;

pub const CONTEXT_LENGTH: u32 = 16_384;

/// LM Studio's `/api/v0/models` entry shape.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub id: &'static str,
    pub object: &'static str,
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub publisher: &'static str,
    pub arch: &'static str,
    pub compatibility_type: &'static str,
    pub quantization: &'static str,
    pub state: &'static str,
    pub max_context_length: u32,
    pub loaded_context_length: u32,
    pub created: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelDescriptor>,
}

/// The single model this bridge advertises, stamped with the current time.
#[must_use]
pub fn advertised_model() -> ModelDescriptor {
    ModelDescriptor {
        id: CANONICAL_MODEL_ID,
        object: "model",
        type_: "llm",
        publisher: "openrouter",
        arch: "llama",
        compatibility_type: "openai",
        quantization: "none",
        state: "loaded",
        max_context_length: CONTEXT_LENGTH,
        loaded_context_length: CONTEXT_LENGTH,
        created: unix_now_secs(),
    }
}

/// `GET /v1/models` and `GET /api/v0/models`.
pub fn handler() -> Json<ModelList> {
    Json(ModelList {
        object: "list",
        data: vec![advertised_model()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn test_handler_lists_single_descriptor() {
        let before = unix_now_secs();
        let response = handler().into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(body["object"], "list");
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        let model = &data[0];
        assert_eq!(model["id"], "deepseek/deepseek-chat-v3-0324:free");
        assert_eq!(model["type"], "llm");
        assert_eq!(model["publisher"], "openrouter");
        assert_eq!(model["compatibility_type"], "openai");
        assert_eq!(model["state"], "loaded");
        assert_eq!(model["max_context_length"], 16_384);
        assert_eq!(model["loaded_context_length"], 16_384);
        assert!(model["created"].as_u64().unwrap() >= before);
    }
}
