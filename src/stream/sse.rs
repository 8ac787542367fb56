//! SSE (Server-Sent Events) frame parser, encoder, and stream utilities.
//!
//! Handles the low-level parsing of SSE frames from the provider's byte
//! stream, including buffering partial lines and UTF-8 sequences split across
//! chunks, per the
//! [SSE specification](https://html.spec.whatwg.org/multipage/server-sent-events.html).

use super::SseEvent;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

/// The literal terminal frame of every completed downstream stream.
pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";
pub const DONE_SENTINEL: &str = "[DONE]";

struct PendingEvents {
    events: SmallVec<[SseEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    fn pop_front(&mut self) -> Option<SseEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::take(&mut self.events[self.head]);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    fn extend_from_vec(&mut self, parsed: &mut Vec<SseEvent>) {
        self.events.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// SseParser: incremental line parser
// ---------------------------------------------------------------------------

/// Incremental SSE line parser.
///
/// Feed it raw text chunks (potentially arriving in arbitrary byte
/// boundaries) and it yields fully-assembled [`SseEvent`] frames.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    read_offset: usize,
    event_type: Option<String>,
    data_buffer: String,
    has_data: bool,
    last_event_id: Option<String>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw text and return any complete events parsed.
    ///
    /// - `event:` sets the event type for the next frame
    /// - `data:` appends to the data buffer (one leading space stripped);
    ///   multiple `data:` lines are joined with `\n`
    /// - an empty line terminates a frame
    /// - lines starting with `:` are comments (OpenRouter keep-alives) and ignored
    /// - `id:` sets the last event ID; `retry:` and unknown fields are ignored
    pub fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw text and append complete events into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<SseEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                &mut self.last_event_id,
                out,
            );
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
        } else if self.read_offset >= self.buffer.len() / 2 {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Flush a trailing frame that was never terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer[self.read_offset..].is_empty() {
            let tail = std::mem::take(&mut self.buffer);
            let mut out = Vec::new();
            let line = tail[self.read_offset..].trim_end_matches('\r');
            Self::process_line(
                line,
                &mut self.event_type,
                &mut self.data_buffer,
                &mut self.has_data,
                &mut self.last_event_id,
                &mut out,
            );
            self.read_offset = 0;
        }
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseEvent {
            event: self.event_type.take(),
            data: std::mem::take(&mut self.data_buffer),
            id: self.last_event_id.clone(),
        })
    }

    fn process_line(
        line: &str,
        event_type: &mut Option<String>,
        data_buffer: &mut String,
        has_data: &mut bool,
        last_event_id: &mut Option<String>,
        events: &mut Vec<SseEvent>,
    ) {
        if line.is_empty() {
            if *has_data {
                events.push(SseEvent {
                    event: event_type.take(),
                    data: std::mem::take(data_buffer),
                    id: last_event_id.clone(),
                });
                *has_data = false;
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if *has_data {
                data_buffer.push('\n');
            } else {
                *has_data = true;
            }
            data_buffer.push_str(value);
        } else if let Some(value) = line.strip_prefix("event:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *event_type = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            *last_event_id = Some(value.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding helpers
// ---------------------------------------------------------------------------

/// Frame a JSON payload as `data: {json}\n\n`.
#[must_use]
pub fn data_frame(json: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(8 + json.len());
    out.put_slice(b"data: ");
    out.put_slice(json);
    out.put_slice(b"\n\n");
    out.freeze()
}

#[must_use]
pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME)
}

#[must_use]
pub fn is_done_event(event: &SseEvent) -> bool {
    event.data.trim() == DONE_SENTINEL
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

fn feed_utf8(parser: &mut SseParser, remainder: &mut Vec<u8>, bytes: &[u8], out: &mut Vec<SseEvent>) {
    remainder.extend_from_slice(bytes);
    let mut consumed = 0;
    loop {
        match std::str::from_utf8(&remainder[consumed..]) {
            Ok(text) => {
                parser.feed_into(text, out);
                consumed = remainder.len();
                break;
            }
            Err(e) => {
                let valid_up_to = consumed + e.valid_up_to();
                // Safety: valid_up_to is guaranteed to be a valid UTF-8 boundary.
                let text = unsafe { std::str::from_utf8_unchecked(&remainder[consumed..valid_up_to]) };
                parser.feed_into(text, out);
                consumed = valid_up_to;
                match e.error_len() {
                    // Invalid sequence: replace it and keep scanning.
                    Some(invalid_len) => {
                        parser.feed_into(char::REPLACEMENT_CHARACTER.encode_utf8(&mut [0; 4]), out);
                        consumed += invalid_len;
                    }
                    // Incomplete trailing sequence: wait for the next chunk.
                    None => break,
                }
            }
        }
    }
    remainder.drain(..consumed);
}

/// Split a byte stream into SSE events using [`SseParser`].
///
/// Body errors are yielded in place and end the stream; an unterminated
/// trailing frame is flushed when the body ends.
pub fn sse_event_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<SseEvent, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    struct State<S> {
        stream: std::pin::Pin<Box<S>>,
        parser: SseParser,
        remainder: Vec<u8>,
        parsed: Vec<SseEvent>,
        pending: PendingEvents,
        finished: bool,
    }

    let state = State {
        stream: Box::pin(byte_stream),
        parser: SseParser::new(),
        remainder: Vec::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingEvents::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.finished {
                return None;
            }

            match st.stream.as_mut().next().await {
                Some(Ok(bytes)) => {
                    feed_utf8(&mut st.parser, &mut st.remainder, &bytes, &mut st.parsed);
                    st.pending.extend_from_vec(&mut st.parsed);
                }
                Some(Err(err)) => {
                    st.finished = true;
                    return Some((Err(err), st));
                }
                None => {
                    st.finished = true;
                    if let Some(event) = st.parser.finish() {
                        return Some((Ok(event), st));
                    }
                    return None;
                }
            }
        }
    })
}
