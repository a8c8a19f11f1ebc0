//! chatframe — a conversational protocol layer between a text-generation
//! runtime and its consumers.
//!
//! The runtime is consumed through two narrow traits ([`runtime::Model`],
//! [`runtime::Tokenizer`]). On top of them the crate provides:
//!
//! - per-model prompt [`dialect`]s (round-numbered, tagged, role-block with
//!   token-window limiting, token-native with tool calls);
//! - a [`generation`] loop with UTF-8-safe incremental decoding, stop
//!   sequences, limits, and cancellation;
//! - a [`service`] layer with sync, batch, and streaming chat;
//! - an OpenAI-compatible [`openai`] wire layer (hyper server, ureq client,
//!   SSE parsing) and an interactive [`cli`] front-end.

pub mod cli;
pub mod config;
pub mod dialect;
pub mod error;
pub mod generation;
pub mod history;
pub mod logger;
pub mod mock;
pub mod openai;
pub mod runtime;
pub mod service;
pub mod toolcall;

pub use config::GenerationConfig;
pub use dialect::{Dialect, Reply, RoundNumbering};
pub use error::ChatError;
pub use generation::{GenerationLoop, TextDelta};
pub use history::{ConversationHistory, Role, Turn};
pub use runtime::{Model, ModelInput, Tokenizer};
pub use service::{ChatService, DeltaStream};
