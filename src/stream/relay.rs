//! Drives a [`StreamTranslator`] between an upstream stream and the client.
//!
//! Frames go through a bounded channel into the response body. Each send is
//! bounded by the configured write timeout; a stalled or vanished client ends
//! the relay and drops the upstream connection. Nothing is retried.

use std::convert::Infallible;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::translator::StreamTranslator;
use crate::upstream::{Received, StreamEnd, UpstreamStream};

/// How a relay finished.
#[derive(Debug)]
pub enum RelayEnd {
    /// Upstream ended and the final frames plus `[DONE]` were delivered.
    Completed(StreamEnd),
    /// The client went away before the stream completed.
    ClientGone,
    /// A frame waited longer than the write timeout.
    WriteTimedOut,
}

#[derive(Debug)]
pub struct RelayOutcome {
    pub end: RelayEnd,
    /// Content frames handed to the client, `[DONE]` excluded.
    pub frames: usize,
}

async fn send_frame(
    tx: &mpsc::Sender<Bytes>,
    frame: Bytes,
    write_timeout: Duration,
) -> Result<(), RelayEnd> {
    match tokio::time::timeout(write_timeout, tx.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(RelayEnd::ClientGone),
        Err(_) => Err(RelayEnd::WriteTimedOut),
    }
}

/// Run the receive / reshape / emit loop until upstream ends or the client stops reading.
pub async fn relay(
    mut upstream: UpstreamStream,
    tx: mpsc::Sender<Bytes>,
    write_timeout: Duration,
) -> RelayOutcome {
    let mut translator = StreamTranslator::new();
    let mut sent = 0usize;

    let end = loop {
        let received = tokio::select! {
            received = upstream.recv() => received,
            () = tx.closed() => {
                return RelayOutcome { end: RelayEnd::ClientGone, frames: sent };
            }
        };
        match received {
            Received::Event(chunk) => {
                if let Some(frame) = translator.push(chunk) {
                    if let Err(end) = send_frame(&tx, frame, write_timeout).await {
                        return RelayOutcome { end, frames: sent };
                    }
                    sent += 1;
                }
            }
            Received::End(end) => break end,
        }
    };
    drop(upstream);

    let final_frames = translator.finish();
    let last = final_frames.len() - 1;
    for (i, frame) in final_frames.into_iter().enumerate() {
        if let Err(end) = send_frame(&tx, frame, write_timeout).await {
            return RelayOutcome { end, frames: sent };
        }
        if i < last {
            sent += 1;
        }
    }

    RelayOutcome {
        end: RelayEnd::Completed(end),
        frames: sent,
    }
}

fn log_outcome(model: &str, outcome: &RelayOutcome) {
    match &outcome.end {
        RelayEnd::Completed(StreamEnd::Done) => {
            tracing::debug!(model, frames = outcome.frames, "stream completed");
        }
        RelayEnd::Completed(end @ StreamEnd::Failed(_)) => {
            tracing::warn!(model, frames = outcome.frames, reason = %end, "stream ended early");
        }
        RelayEnd::Completed(end) => {
            tracing::info!(model, frames = outcome.frames, reason = %end, "stream ended");
        }
        RelayEnd::ClientGone => {
            tracing::debug!(model, frames = outcome.frames, "client disconnected mid-stream");
        }
        RelayEnd::WriteTimedOut => {
            tracing::warn!(model, frames = outcome.frames, "client write timed out, abandoning stream");
        }
    }
}

/// Spawn the relay for one request and return the response body it feeds.
pub fn spawn_relay_body(
    upstream: UpstreamStream,
    model: String,
    buffer_frames: usize,
    write_timeout: Duration,
) -> axum::body::Body {
    let (tx, rx) = mpsc::channel::<Bytes>(buffer_frames.max(1));

    tokio::spawn(async move {
        let outcome = relay(upstream, tx, write_timeout).await;
        log_outcome(&model, &outcome);
    });

    let frames = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (Ok::<Bytes, Infallible>(frame), rx))
    });
    axum::body::Body::from_stream(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShimError;
    use crate::protocol::ChatCompletionChunk;
    use crate::stream::sse::done_frame;
    use crate::upstream::UpstreamItem;
    use serde_json::json;
    use tokio::time::Instant;

    fn chunk(id: &str, content: Option<&str>) -> ChatCompletionChunk {
        let delta = match content {
            Some(text) => json!({"content": text}),
            None => json!({}),
        };
        serde_json::from_value(json!({"id": id, "choices": [{"index": 0, "delta": delta}]})).unwrap()
    }

    fn scripted(items: Vec<Result<UpstreamItem, ShimError>>) -> UpstreamStream {
        UpstreamStream::new(
            futures_util::stream::iter(items),
            Instant::now() + Duration::from_secs(300),
        )
    }

    async fn drain(mut rx: mpsc::Receiver<Bytes>) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_relay_completes_with_done() {
        let upstream = scripted(vec![
            Ok(UpstreamItem::Event(chunk("a", Some("Hel")))),
            Ok(UpstreamItem::Event(chunk("b", Some("lo")))),
            Ok(UpstreamItem::Event(chunk("c", None))),
            Ok(UpstreamItem::Done),
        ]);
        let (tx, rx) = mpsc::channel(16);
        let outcome = relay(upstream, tx, Duration::from_secs(5)).await;
        let frames = drain(rx).await;

        assert!(matches!(outcome.end, RelayEnd::Completed(StreamEnd::Done)));
        assert_eq!(outcome.frames, 3);
        assert_eq!(frames.len(), 4);
        assert!(std::str::from_utf8(&frames[2]).unwrap().contains(r#""finish_reason":"stop""#));
        assert_eq!(frames[3], done_frame());
    }

    #[tokio::test]
    async fn test_relay_error_before_any_event_emits_only_done() {
        let upstream = scripted(vec![Err(ShimError::Transport("reset".into()))]);
        let (tx, rx) = mpsc::channel(16);
        let outcome = relay(upstream, tx, Duration::from_secs(5)).await;
        assert!(matches!(
            outcome.end,
            RelayEnd::Completed(StreamEnd::Failed(ShimError::Transport(_)))
        ));
        assert_eq!(outcome.frames, 0);
        assert_eq!(drain(rx).await, vec![done_frame()]);
    }

    #[tokio::test]
    async fn test_relay_mid_stream_error_still_finalizes() {
        let upstream = scripted(vec![
            Ok(UpstreamItem::Event(chunk("a", Some("partial")))),
            Err(ShimError::Transport("reset".into())),
        ]);
        let (tx, rx) = mpsc::channel(16);
        let outcome = relay(upstream, tx, Duration::from_secs(5)).await;
        let frames = drain(rx).await;
        assert_eq!(outcome.frames, 1);
        assert_eq!(frames.len(), 2);
        assert!(std::str::from_utf8(&frames[0]).unwrap().contains("partial"));
        assert_eq!(frames[1], done_frame());
    }

    #[tokio::test]
    async fn test_relay_stops_when_client_is_gone() {
        let upstream = UpstreamStream::new(
            futures_util::stream::pending::<Result<UpstreamItem, ShimError>>(),
            Instant::now() + Duration::from_secs(300),
        );
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let outcome = relay(upstream, tx, Duration::from_secs(5)).await;
        assert!(matches!(outcome.end, RelayEnd::ClientGone));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_write_timeout_on_stalled_client() {
        let items: Vec<_> = (0..4)
            .map(|i| Ok(UpstreamItem::Event(chunk(&format!("c{i}"), Some("x")))))
            .collect();
        let upstream = scripted(items);
        let (tx, _rx) = mpsc::channel(1);
        let outcome = relay(upstream, tx, Duration::from_secs(60)).await;
        assert!(matches!(outcome.end, RelayEnd::WriteTimedOut));
        assert_eq!(outcome.frames, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_deadline_finalizes_held_event() {
        use futures_util::StreamExt;

        let items = futures_util::stream::iter(vec![Ok(UpstreamItem::Event(chunk("a", Some("slow"))))])
            .chain(futures_util::stream::pending());
        let upstream = UpstreamStream::new(items, Instant::now() + Duration::from_secs(300));
        let (tx, rx) = mpsc::channel(16);
        let outcome = relay(upstream, tx, Duration::from_secs(60)).await;
        let frames = drain(rx).await;

        assert!(matches!(outcome.end, RelayEnd::Completed(StreamEnd::TimedOut)));
        assert_eq!(outcome.frames, 1);
        assert_eq!(frames.len(), 2);
        assert!(std::str::from_utf8(&frames[0]).unwrap().contains(r#""content":"slow""#));
        assert_eq!(frames[1], done_frame());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_deadline_before_any_event_emits_only_done() {
        let upstream = UpstreamStream::new(
            futures_util::stream::pending::<Result<UpstreamItem, ShimError>>(),
            Instant::now() + Duration::from_secs(300),
        );
        let (tx, rx) = mpsc::channel(16);
        let outcome = relay(upstream, tx, Duration::from_secs(60)).await;

        assert!(matches!(outcome.end, RelayEnd::Completed(StreamEnd::TimedOut)));
        assert_eq!(outcome.frames, 0);
        assert_eq!(drain(rx).await, vec![done_frame()]);
    }

    #[tokio::test]
    async fn test_spawned_body_streams_frames() {
        let upstream = scripted(vec![
            Ok(UpstreamItem::Event(chunk("a", Some("Hi")))),
            Ok(UpstreamItem::Done),
        ]);
        let body = spawn_relay_body(upstream, "m".into(), 4, Duration::from_secs(5));
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("data: [DONE]\n\n"));
        assert_eq!(text.matches("data: ").count(), 2);
    }
}
