use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{chat, health, models};
use crate::state::AppState;

const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
enum RouteMatch {
    Health,
    Models,
    ChatCompletions,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler.
///
/// The OpenAI-style `/v1` and LM Studio-style `/api/v0` prefixes are served
/// by the same handlers.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path());

    let response = match route {
        RouteMatch::Health => health::health_handler(State(state)).into_response(),
        RouteMatch::Models => models::handler().into_response(),
        RouteMatch::ChatCompletions => {
            let body_bytes = match read_request_body(body).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            chat::handler(State(state), body_bytes).await
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    Ok(response)
}

async fn read_request_body(body: Body) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, DEFAULT_BODY_LIMIT_BYTES)
        .await
        .map_err(|_| {
            (
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body too large (max 2MiB)",
            )
                .into_response()
        })
}

fn strip_api_prefix(path: &str) -> Option<&str> {
    path.strip_prefix("/v1")
        .or_else(|| path.strip_prefix("/api/v0"))
}

fn match_route(method: &Method, path: &str) -> RouteMatch {
    if path == "/" {
        return if method == Method::GET {
            RouteMatch::Health
        } else {
            RouteMatch::MethodNotAllowed
        };
    }

    match strip_api_prefix(path) {
        Some("/models") => {
            if method == Method::GET {
                RouteMatch::Models
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        Some("/chat/completions") => {
            if method == Method::POST {
                RouteMatch::ChatCompletions
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        _ => RouteMatch::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_route_both_prefixes() {
        for prefix in ["/v1", "/api/v0"] {
            assert_eq!(
                match_route(&Method::GET, &format!("{prefix}/models")),
                RouteMatch::Models
            );
            assert_eq!(
                match_route(&Method::POST, &format!("{prefix}/chat/completions")),
                RouteMatch::ChatCompletions
            );
        }
    }

    #[test]
    fn test_match_route_wrong_method_and_unknown_paths() {
        assert_eq!(
            match_route(&Method::GET, "/v1/chat/completions"),
            RouteMatch::MethodNotAllowed
        );
        assert_eq!(match_route(&Method::POST, "/v1/models"), RouteMatch::MethodNotAllowed);
        assert_eq!(match_route(&Method::GET, "/v2/models"), RouteMatch::NotFound);
        assert_eq!(match_route(&Method::GET, "/v1models"), RouteMatch::NotFound);
        assert_eq!(match_route(&Method::POST, "/api/v0/embeddings"), RouteMatch::NotFound);
        assert_eq!(match_route(&Method::GET, "/"), RouteMatch::Health);
    }
}
