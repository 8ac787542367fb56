//! One-event look-ahead relay for upstream chat completion streams.
//!
//! An event is only released once its successor arrives, so the translator
//! always knows which event is last when the stream ends. That last event is
//! rewritten into a clean stop event if it carries no content, then the
//! `[DONE]` sentinel follows.
//!
//! The translator is sans-IO: callers feed it events and write out whatever
//! frames it hands back. See [`super::relay`] for the async driver.

use bytes::Bytes;
use smallvec::SmallVec;

use super::reshape::{encode_event_frame, reshape_event};
use super::sse::done_frame;
use crate::protocol::ChatCompletionChunk;

/// Frames released when the stream ends: at most the held event, then `[DONE]`.
pub type FinalFrames = SmallVec<[Bytes; 2]>;

/// Look-ahead slot.
#[derive(Debug, Default)]
pub enum Pending {
    #[default]
    Empty,
    /// Reshaped, not yet known to be final or non-final.
    Holding(ChatCompletionChunk),
}

#[derive(Debug, Default)]
pub struct StreamTranslator {
    pending: Pending,
    emitted: usize,
    dropped: usize,
}

impl StreamTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the next upstream event.
    ///
    /// Returns the frame of the previously held event, which the arrival of
    /// `event` has just confirmed as non-final.
    pub fn push(&mut self, event: ChatCompletionChunk) -> Option<Bytes> {
        let previous = std::mem::replace(&mut self.pending, Pending::Holding(reshape_event(event)));
        match previous {
            Pending::Empty => None,
            Pending::Holding(confirmed) => self.encode(&confirmed),
        }
    }

    /// End the stream, consuming the translator.
    ///
    /// A held event whose first delta has no content is rewritten to
    /// `delta: {}` / `finish_reason: "stop"`. `[DONE]` is always the last frame.
    #[must_use]
    pub fn finish(mut self) -> FinalFrames {
        let mut frames = FinalFrames::new();
        if let Pending::Holding(mut last) = std::mem::take(&mut self.pending) {
            if last.is_content_free() {
                last.mark_stopped();
            }
            if let Some(frame) = self.encode(&last) {
                frames.push(frame);
            }
        }
        frames.push(done_frame());
        frames
    }

    #[must_use]
    pub fn is_holding(&self) -> bool {
        matches!(self.pending, Pending::Holding(_))
    }

    /// Content frames released so far.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn encode(&mut self, chunk: &ChatCompletionChunk) -> Option<Bytes> {
        match encode_event_frame(chunk) {
            Ok(frame) => {
                self.emitted += 1;
                Some(frame)
            }
            Err(err) => {
                self.dropped += 1;
                tracing::warn!(chunk_id = ?chunk.id, error = %err, "dropping event that failed to encode");
                None
            }
        }
    }
}
