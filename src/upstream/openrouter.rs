use futures_util::future::BoxFuture;
use tokio::time::Instant;

use super::{ChatUpstream, UpstreamStream};
use crate::config::UpstreamConfig;
use crate::error::ShimError;
use crate::protocol::UpstreamChatRequest;
use crate::stream::sse::sse_event_stream;

const MAX_ERROR_MESSAGE_LEN: usize = 500;
const APP_TITLE: &str = "lmbridge";

fn build_reqwest_client(config: &UpstreamConfig) -> Result<reqwest::Client, ShimError> {
    reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(config.connect_timeout())
        .build()
        .map_err(|err| ShimError::Config(format!("Failed to build HTTP client: {err}")))
}

/// OpenRouter's OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenRouterUpstream {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
    api_key: String,
    timeout_secs: u64,
}

impl OpenRouterUpstream {
    /// # Errors
    ///
    /// Returns [`ShimError::Config`] when the HTTP client cannot be built.
    pub fn new(config: &UpstreamConfig, api_key: String) -> Result<Self, ShimError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            client: build_reqwest_client(config)?,
            endpoint: format!("{base_url}/chat/completions"),
            base_url,
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }

    async fn open_stream(
        &self,
        request: &UpstreamChatRequest,
        deadline: Instant,
    ) -> Result<UpstreamStream, ShimError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| ShimError::Internal(format!("Failed to encode upstream request: {e}")))?;

        let send = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(http::header::CONTENT_TYPE, "application/json")
            .header(http::header::ACCEPT, "text/event-stream")
            .header("X-Title", APP_TITLE)
            .body(body)
            .send();
        let response = tokio::time::timeout_at(deadline, send)
            .await
            .map_err(|_| ShimError::Timeout(self.timeout_secs))??;

        let status = response.status();
        if !status.is_success() {
            let body = tokio::time::timeout_at(deadline, response.bytes())
                .await
                .map_err(|_| ShimError::Timeout(self.timeout_secs))??;
            return Err(ShimError::Upstream {
                status: status.as_u16(),
                message: summarize_error_body(&body),
            });
        }

        Ok(UpstreamStream::from_sse(
            sse_event_stream(response.bytes_stream()),
            deadline,
        ))
    }
}

impl ChatUpstream for OpenRouterUpstream {
    fn open<'a>(
        &'a self,
        request: &'a UpstreamChatRequest,
        deadline: Instant,
    ) -> BoxFuture<'a, Result<UpstreamStream, ShimError>> {
        Box::pin(self.open_stream(request, deadline))
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn truncate_message(msg: &str) -> String {
    if msg.len() <= MAX_ERROR_MESSAGE_LEN {
        return msg.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE_LEN;
    while !msg.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &msg[..end])
}

/// Reduce an upstream error body to a short message.
///
/// Prefers `error.message` from a JSON body, otherwise the trimmed text.
#[must_use]
pub fn summarize_error_body(body: &[u8]) -> String {
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
        {
            return truncate_message(msg);
        }
    }
    truncate_message(String::from_utf8_lossy(body).trim())
}
