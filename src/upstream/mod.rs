//! Streaming connection to the remote chat completions provider.
//!
//! [`ChatUpstream`] is the seam between request handling and the provider:
//! production uses [`OpenRouterUpstream`], tests plug in scripted streams
//! built with [`UpstreamStream::new`].

mod openrouter;

use std::fmt;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use tokio::time::Instant;

use crate::error::ShimError;
use crate::protocol::{ChatCompletionChunk, UpstreamChatRequest};
use crate::stream::sse::is_done_event;
use crate::stream::SseEvent;

pub use openrouter::{summarize_error_body, OpenRouterUpstream};

/// Opens streaming chat completion calls.
pub trait ChatUpstream: Send + Sync {
    /// Start a streaming call that must finish before `deadline`.
    ///
    /// Failures here happen before any response byte reaches the client and
    /// are reported as HTTP errors.
    fn open<'a>(
        &'a self,
        request: &'a UpstreamChatRequest,
        deadline: Instant,
    ) -> BoxFuture<'a, Result<UpstreamStream, ShimError>>;

    /// Base URL reported by the health endpoint.
    fn base_url(&self) -> &str;
}

/// One decoded item of the provider stream.
#[derive(Debug)]
pub enum UpstreamItem {
    Event(ChatCompletionChunk),
    /// The `[DONE]` sentinel.
    Done,
}

/// Why an upstream stream stopped producing events.
#[derive(Debug)]
pub enum StreamEnd {
    /// The provider sent `[DONE]`.
    Done,
    /// The body ended without a sentinel.
    Closed,
    /// The call deadline fired while waiting for the next event.
    TimedOut,
    /// Transport failure, undecodable event, or in-band provider error.
    Failed(ShimError),
}

impl fmt::Display for StreamEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEnd::Done => write!(f, "done"),
            StreamEnd::Closed => write!(f, "closed"),
            StreamEnd::TimedOut => write!(f, "timed out"),
            StreamEnd::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

/// Result of [`UpstreamStream::recv`].
#[derive(Debug)]
pub enum Received {
    Event(ChatCompletionChunk),
    End(StreamEnd),
}

/// Pull-based view over an open provider stream.
///
/// The underlying connection is dropped as soon as an end is observed, or
/// when this value is dropped.
pub struct UpstreamStream {
    items: Option<BoxStream<'static, Result<UpstreamItem, ShimError>>>,
    deadline: Instant,
}

impl UpstreamStream {
    pub fn new<S>(items: S, deadline: Instant) -> Self
    where
        S: Stream<Item = Result<UpstreamItem, ShimError>> + Send + 'static,
    {
        Self {
            items: Some(items.boxed()),
            deadline,
        }
    }

    /// Build a stream from parsed SSE events.
    ///
    /// Events with empty data are skipped, `[DONE]` maps to [`UpstreamItem::Done`]
    /// and every other payload must decode as a [`ChatCompletionChunk`].
    pub fn from_sse<S, E>(events: S, deadline: Instant) -> Self
    where
        S: Stream<Item = Result<SseEvent, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let items = events.filter_map(|event| async move {
            match event {
                Ok(event) if event.data.trim().is_empty() => None,
                Ok(event) => Some(decode_sse_event(&event)),
                Err(err) => Some(Err(ShimError::Transport(format!(
                    "upstream stream error: {err}"
                )))),
            }
        });
        Self::new(items, deadline)
    }

    /// Wait for the next event, or the reason the stream ended.
    ///
    /// Once an end has been returned every further call returns
    /// [`StreamEnd::Closed`].
    pub async fn recv(&mut self) -> Received {
        let Some(items) = self.items.as_mut() else {
            return Received::End(StreamEnd::Closed);
        };

        let end = match tokio::time::timeout_at(self.deadline, items.next()).await {
            Ok(Some(Ok(UpstreamItem::Event(chunk)))) => return Received::Event(chunk),
            Ok(Some(Ok(UpstreamItem::Done))) => StreamEnd::Done,
            Ok(Some(Err(err))) => StreamEnd::Failed(err),
            Ok(None) => StreamEnd::Closed,
            Err(_) => StreamEnd::TimedOut,
        };
        self.items = None;
        Received::End(end)
    }
}

fn decode_sse_event(event: &SseEvent) -> Result<UpstreamItem, ShimError> {
    if is_done_event(event) {
        return Ok(UpstreamItem::Done);
    }
    let chunk: ChatCompletionChunk = serde_json::from_str(&event.data)
        .map_err(|e| ShimError::Transport(format!("undecodable upstream event: {e}")))?;
    if let Some(error) = chunk.provider_error() {
        return Err(provider_error(error));
    }
    Ok(UpstreamItem::Event(chunk))
}

fn provider_error(error: &serde_json::Value) -> ShimError {
    let status = error
        .get("code")
        .and_then(serde_json::Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(502);
    let message = error
        .get("message")
        .and_then(serde_json::Value::as_str)
        .map_or_else(|| error.to_string(), ToString::to_string);
    ShimError::Upstream { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sse(data: &str) -> Result<SseEvent, std::convert::Infallible> {
        Ok(SseEvent {
            event: None,
            data: data.to_string(),
            id: None,
        })
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_recv_events_then_done() {
        let events = futures_util::stream::iter(vec![
            sse(r#"{"id":"gen-1","choices":[{"index":0,"delta":{"content":"Hi"}}]}"#),
            sse(""),
            sse("[DONE]"),
            sse(r#"{"id":"gen-after-done","choices":[]}"#),
        ]);
        let mut stream = UpstreamStream::from_sse(events, far_deadline());

        match stream.recv().await {
            Received::Event(chunk) => assert_eq!(chunk.id.as_deref(), Some("gen-1")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(stream.recv().await, Received::End(StreamEnd::Done)));
        assert!(matches!(stream.recv().await, Received::End(StreamEnd::Closed)));
    }

    #[tokio::test]
    async fn test_recv_closed_without_sentinel() {
        let events = futures_util::stream::iter(Vec::<Result<SseEvent, std::convert::Infallible>>::new());
        let mut stream = UpstreamStream::from_sse(events, far_deadline());
        assert!(matches!(stream.recv().await, Received::End(StreamEnd::Closed)));
    }

    #[tokio::test]
    async fn test_recv_in_band_provider_error() {
        let events = futures_util::stream::iter(vec![sse(
            r#"{"error":{"code":429,"message":"Rate limit exceeded"}}"#,
        )]);
        let mut stream = UpstreamStream::from_sse(events, far_deadline());
        match stream.recv().await {
            Received::End(StreamEnd::Failed(ShimError::Upstream { status, message })) => {
                assert_eq!(status, 429);
                assert_eq!(message, "Rate limit exceeded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_recv_undecodable_event_fails() {
        let events = futures_util::stream::iter(vec![sse("{not json")]);
        let mut stream = UpstreamStream::from_sse(events, far_deadline());
        assert!(matches!(
            stream.recv().await,
            Received::End(StreamEnd::Failed(ShimError::Transport(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_deadline_fires() {
        let mut stream = UpstreamStream::new(
            futures_util::stream::pending::<Result<UpstreamItem, ShimError>>(),
            Instant::now() + Duration::from_secs(300),
        );
        assert!(matches!(stream.recv().await, Received::End(StreamEnd::TimedOut)));
        assert!(matches!(stream.recv().await, Received::End(StreamEnd::Closed)));
    }
}
