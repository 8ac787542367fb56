pub mod chat;
pub mod chunk;

pub use chat::{parse_chat_request, ChatMessage, ChatRequest, UpstreamChatRequest};
pub use chunk::{ChatCompletionChunk, ChunkChoice, ChunkDelta};
