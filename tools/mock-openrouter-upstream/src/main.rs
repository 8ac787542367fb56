use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 19_002;

/// Shape of the stream served on `/api/v1/chat/completions`.
#[derive(Copy, Clone)]
enum MockScenario {
    /// Content events, a role-only tail with `finish_reason`, then `[DONE]`.
    Text,
    /// Content events carrying `logprobs`, ending without a content-free tail.
    Logprobs,
    /// Body closes without the `[DONE]` sentinel.
    Truncated,
    /// An in-band `{"error": ...}` event after the first token.
    InBandError,
    /// HTTP 401 with an OpenRouter-style error body.
    Unauthorized,
}

struct MockState {
    scenario: MockScenario,
    requests: AtomicU64,
    last_model: std::sync::Mutex<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u16("UPSTREAM_PORT", DEFAULT_UPSTREAM_PORT);
    let state = Arc::new(MockState {
        scenario: parse_scenario(),
        requests: AtomicU64::new(0),
        last_model: std::sync::Mutex::new(String::new()),
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock upstream on 127.0.0.1:{port}: {err}"));
    eprintln!("mock openrouter listening on http://127.0.0.1:{port}/api/v1");

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock upstream connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("logprobs") => MockScenario::Logprobs,
        Ok("truncated") => MockScenario::Truncated,
        Ok("inband-error") => MockScenario::InBandError,
        Ok("unauthorized") => MockScenario::Unauthorized,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &Arc<MockState>) -> Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    let body = read_request_body(body).await;

    let method = parts.method;
    let path = parts.uri.path();

    if method == Method::GET && path == "/_mock/stats" {
        return stats_response(state);
    }
    if method != Method::POST {
        return simple_response_static(
            StatusCode::METHOD_NOT_ALLOWED,
            "application/json",
            br#"{"error":"method_not_allowed"}"#,
        );
    }
    if !matches!(path, "/api/v1/chat/completions" | "/v1/chat/completions") {
        return simple_response_static(
            StatusCode::NOT_FOUND,
            "application/json",
            br#"{"error":{"message":"Not Found","code":404}}"#,
        );
    }

    state.requests.fetch_add(1, Ordering::Relaxed);
    if let Ok(mut last_model) = state.last_model.lock() {
        *last_model = extract_model(&body).unwrap_or_default();
    }

    if !has_bearer(parts.headers.get(header::AUTHORIZATION)) {
        return unauthorized();
    }

    match state.scenario {
        MockScenario::Unauthorized => unauthorized(),
        MockScenario::Text => sse_response(STREAM_TEXT),
        MockScenario::Logprobs => sse_response(STREAM_LOGPROBS),
        MockScenario::Truncated => sse_response(STREAM_TRUNCATED),
        MockScenario::InBandError => sse_response(STREAM_INBAND_ERROR),
    }
}

async fn read_request_body(body: Incoming) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    }
}

fn has_bearer(value: Option<&HeaderValue>) -> bool {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| !token.trim().is_empty())
}

/// Pulls `"model":"..."` out of the request without a JSON dependency.
fn extract_model(body: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    let start = text.find("\"model\"")? + "\"model\"".len();
    let rest = text[start..].trim_start().strip_prefix(':')?.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn stats_response(state: &MockState) -> Response<Full<Bytes>> {
    let scenario = match state.scenario {
        MockScenario::Text => "text",
        MockScenario::Logprobs => "logprobs",
        MockScenario::Truncated => "truncated",
        MockScenario::InBandError => "inband-error",
        MockScenario::Unauthorized => "unauthorized",
    };
    let requests = state.requests.load(Ordering::Relaxed);
    let last_model = state
        .last_model
        .lock()
        .map(|model| model.clone())
        .unwrap_or_default();
    let body = format!(
        "{{\"scenario\":\"{scenario}\",\"requests\":{requests},\"last_model\":\"{last_model}\"}}"
    );
    simple_response(
        StatusCode::OK,
        "application/json",
        Bytes::from(body.into_bytes()),
    )
}

fn unauthorized() -> Response<Full<Bytes>> {
    simple_response_static(
        StatusCode::UNAUTHORIZED,
        "application/json",
        br#"{"error":{"message":"No auth credentials found","code":401}}"#,
    )
}

fn sse_response(body: &'static [u8]) -> Response<Full<Bytes>> {
    let mut response = simple_response_static(StatusCode::OK, "text/event-stream", body);
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn simple_response(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn simple_response_static(
    status: StatusCode,
    content_type: &'static str,
    body: &'static [u8],
) -> Response<Full<Bytes>> {
    simple_response(status, content_type, Bytes::from_static(body))
}

const STREAM_TEXT: &[u8] = b": OPENROUTER PROCESSING\n\ndata: {\"id\":\"gen-mock\",\"provider\":\"Mock\",\"model\":\"deepseek/deepseek-chat-v3-0324:free\",\"object\":\"chat.completion.chunk\",\"created\":1,\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"o\"},\"finish_reason\":null,\"native_finish_reason\":null}]}\n\ndata: {\"id\":\"gen-mock\",\"provider\":\"Mock\",\"model\":\"deepseek/deepseek-chat-v3-0324:free\",\"object\":\"chat.completion.chunk\",\"created\":1,\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"k\"},\"finish_reason\":null,\"native_finish_reason\":null}]}\n\ndata: {\"id\":\"gen-mock\",\"provider\":\"Mock\",\"model\":\"deepseek/deepseek-chat-v3-0324:free\",\"object\":\"chat.completion.chunk\",\"created\":1,\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":\"stop\",\"native_finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":2,\"total_tokens\":3}}\n\ndata: [DONE]\n\n";
const STREAM_LOGPROBS: &[u8] = b"data: {\"id\":\"gen-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"o\"},\"finish_reason\":null,\"logprobs\":{\"content\":[{\"token\":\"o\",\"logprob\":-0.1}]}}]}\n\ndata: {\"id\":\"gen-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"k\"},\"finish_reason\":\"length\",\"logprobs\":{\"content\":[{\"token\":\"k\",\"logprob\":-0.2}]}}]}\n\ndata: [DONE]\n\n";
const STREAM_TRUNCATED: &[u8] = b"data: {\"id\":\"gen-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"partial\"},\"finish_reason\":null}]}\n\n";
const STREAM_INBAND_ERROR: &[u8] = b"data: {\"id\":\"gen-mock\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"m1\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"o\"},\"finish_reason\":null}]}\n\ndata: {\"error\":{\"code\":502,\"message\":\"Provider returned error\"}}\n\n";
