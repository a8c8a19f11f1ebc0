use thiserror::Error;

/// Errors surfaced by the protocol layer.
///
/// Dialect parse failures (`UnsupportedRole`, `MalformedToolCall`) are fatal
/// to the request that raised them, never to the session. Wire-level kinds
/// (`Validation`, `Api`, `StreamTerminated`) stop at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A turn's role has no meaning in the active dialect.
    #[error("unsupported role for active dialect: {0}")]
    UnsupportedRole(String),

    /// Tool-call output lacked the expected metadata/content split.
    #[error("malformed tool call: {0}")]
    MalformedToolCall(String),

    /// Streaming connection dropped before the completion sentinel.
    /// Fragments already yielded remain valid.
    #[error("stream terminated before completion sentinel")]
    StreamTerminated,

    /// Generation exceeded its wall-clock budget. The session stays usable.
    #[error("generation timed out after {0:?}")]
    GenerationTimeout(std::time::Duration),

    /// Wire request failed schema validation; never reaches generation.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Model or tokenizer capability failure.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Remote server answered with an error body.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("http transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// Whether this error can degrade to best-effort plain text instead of
    /// aborting the reply.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChatError::MalformedToolCall(_))
    }
}
