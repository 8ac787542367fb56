//! Per-event cleanup applied before an upstream chunk is relayed.

use bytes::Bytes;

use super::sse::data_frame;
use crate::protocol::ChatCompletionChunk;

/// Force `logprobs` to an explicit `null` on every choice.
///
/// The provider omits the field; LM Studio clients expect it present. Deltas
/// and every other field are left untouched, so reshaping is idempotent.
#[must_use]
pub fn reshape_event(mut chunk: ChatCompletionChunk) -> ChatCompletionChunk {
    for choice in &mut chunk.choices {
        choice.logprobs = None;
    }
    chunk
}

/// Encode a chunk as one `data: {json}\n\n` frame.
///
/// # Errors
///
/// Returns the serializer error when the chunk holds data JSON cannot express.
pub fn encode_event_frame(chunk: &ChatCompletionChunk) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(chunk)?;
    Ok(data_frame(&json))
}
