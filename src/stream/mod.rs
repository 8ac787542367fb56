pub mod relay;
pub mod reshape;
pub mod sse;
pub mod translator;

pub use relay::{relay, spawn_relay_body, RelayEnd, RelayOutcome};
pub use reshape::{encode_event_frame, reshape_event};
pub use sse::{sse_event_stream, SseParser};
pub use translator::{FinalFrames, Pending, StreamTranslator};

/// A parsed SSE frame from the upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}
