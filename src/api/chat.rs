use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use tokio::time::Instant;

use crate::error::ShimError;
use crate::protocol::chat::DEFAULT_MAX_TOKENS;
use crate::protocol::{parse_chat_request, ChatRequest, UpstreamChatRequest};
use crate::state::AppState;
use crate::stream::spawn_relay_body;

/// Turn a client request into the request sent upstream.
///
/// Only the model (alias table, exact match) and `max_tokens` (defaulted when
/// absent or not positive) are changed. Passthrough fields are dropped here.
#[must_use]
pub fn normalize_request(
    request: ChatRequest,
    aliases: &BTreeMap<String, String>,
) -> UpstreamChatRequest {
    let model = match aliases.get(&request.model) {
        Some(canonical) => canonical.clone(),
        None => request.model,
    };
    let max_tokens = match request.max_tokens {
        Some(max_tokens) if max_tokens > 0 => max_tokens,
        _ => DEFAULT_MAX_TOKENS,
    };

    UpstreamChatRequest {
        model,
        messages: request.messages,
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens,
        stream: true,
    }
}

fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    headers.insert("x-accel-buffering", http::HeaderValue::from_static("no"));
    response
}

async fn handler_inner(state: Arc<AppState>, body: bytes::Bytes) -> Result<Response, ShimError> {
    let request = parse_chat_request(&body).inspect_err(|err| {
        tracing::warn!(error = %err, "rejecting chat completion request");
    })?;
    let upstream_request = normalize_request(request, &state.config.model_aliases);
    tracing::info!(
        model = %upstream_request.model,
        messages = upstream_request.messages.len(),
        "chat completion request"
    );

    let deadline = Instant::now() + state.config.upstream.timeout();
    let upstream = state
        .upstream
        .open(&upstream_request, deadline)
        .await
        .inspect_err(|err| {
            tracing::error!(model = %upstream_request.model, error = %err, "failed to open upstream stream");
        })?;

    let server = &state.config.server;
    let body = spawn_relay_body(
        upstream,
        upstream_request.model,
        server.stream_buffer_frames,
        server.write_timeout(),
    );
    Ok(sse_ok_response(body))
}

/// `POST /v1/chat/completions` and `POST /api/v0/chat/completions`.
pub async fn handler(State(state): State<Arc<AppState>>, body: bytes::Bytes) -> Response {
    match handler_inner(state, body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CANONICAL_MODEL_ID, LEGACY_MODEL_ALIAS};
    use crate::config::AppConfig;

    fn request(model: &str, max_tokens: Option<i64>) -> ChatRequest {
        let mut body = serde_json::json!({
            "model": model,
            "messages": [{"role": "system", "content": "be brief"}, {"role": "user", "content": "hi"}],
            "temperature": 0.0,
            "tools": [{"type": "function", "function": {"name": "f"}}],
            "keep_alive": "10m"
        });
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = max_tokens.into();
        }
        parse_chat_request(&serde_json::to_vec(&body).unwrap()).unwrap()
    }

    fn aliases() -> BTreeMap<String, String> {
        AppConfig::default().model_aliases
    }

    #[test]
    fn test_legacy_alias_maps_to_canonical() {
        let out = normalize_request(request(LEGACY_MODEL_ALIAS, Some(10)), &aliases());
        assert_eq!(out.model, CANONICAL_MODEL_ID);
    }

    #[test]
    fn test_other_models_pass_through() {
        for model in ["openai/gpt-4o", "deepseek-r1-distill-llama-8b-q4", ""] {
            let out = normalize_request(request(model, Some(10)), &aliases());
            assert_eq!(out.model, model);
        }
    }

    #[test]
    fn test_max_tokens_defaulting() {
        let cases = [(Some(0), 1024), (Some(-5), 1024), (None, 1024), (Some(500), 500)];
        for (input, expected) in cases {
            let out = normalize_request(request("m", input), &aliases());
            assert_eq!(out.max_tokens, expected, "input {input:?}");
        }
    }

    #[test]
    fn test_sampling_and_messages_unchanged() {
        let out = normalize_request(request("m", None), &aliases());
        assert_eq!(out.temperature, Some(0.0));
        assert_eq!(out.top_p, None);
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].role, "system");
        assert!(out.stream);
    }

    #[test]
    fn test_passthrough_fields_not_forwarded() {
        let out = normalize_request(request("m", None), &aliases());
        let wire = serde_json::to_value(&out).unwrap();
        for key in ["tools", "keep_alive", "format", "options"] {
            assert!(wire.get(key).is_none(), "{key} leaked upstream");
        }
    }

    #[test]
    fn test_sse_headers() {
        let response = sse_ok_response(axum::body::Body::empty());
        let headers = response.headers();
        assert_eq!(headers[http::header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[http::header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[http::header::CONNECTION], "keep-alive");
        assert_eq!(headers["x-accel-buffering"], "no");
    }
}
