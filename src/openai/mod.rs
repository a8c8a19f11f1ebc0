//! OpenAI-compatible wire layer: request/response types, an SSE push parser,
//! a hyper server, and a blocking ureq client.

pub mod client;
pub mod server;
pub mod sse;
pub mod types;

pub use client::{ChatStream, OpenAiClient};
pub use server::{handle_request, ServerContext};
pub use sse::{SseEvent, SseParser};
pub use types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage,
};
