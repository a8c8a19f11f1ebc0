//! Capability traits for the external model runtime.
//!
//! The transformer forward pass, tokenizer internals and checkpoint loading
//! live behind these two traits; the protocol layer consumes nothing else.

use crate::config::GenerationConfig;
use crate::error::ChatError;
use crate::history::ConversationHistory;

/// Model input produced by a dialect: either a flat prompt string or a
/// pre-tokenized id sequence. Opaque to the generation loop beyond being an
/// argument to [`Model::generate`].
#[derive(Debug, Clone, PartialEq)]
pub enum ModelInput {
    Text(String),
    Tokens(Vec<u32>),
}

impl ModelInput {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ModelInput::Text(text) => Some(text),
            ModelInput::Tokens(_) => None,
        }
    }

    /// Token count of this input under the given tokenizer.
    pub fn token_len(&self, tokenizer: &dyn Tokenizer) -> usize {
        match self {
            ModelInput::Text(text) => tokenizer.encode(text).len(),
            ModelInput::Tokens(ids) => ids.len(),
        }
    }
}

/// Tokenizer capability. Implementations must be safe for concurrent
/// stateless calls; sessions hold them behind `Arc`.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;

    fn decode(&self, ids: &[u32]) -> String;

    /// Model-family chat templating, used by the token-native dialect.
    /// Tokenizers without a built-in template report a runtime error.
    fn build_chat_input(&self, _history: &ConversationHistory) -> Result<Vec<u32>, ChatError> {
        Err(ChatError::Runtime(
            "tokenizer has no built-in chat template".to_string(),
        ))
    }
}

/// Lazy token sequence produced by one sampling run.
pub type TokenStream = Box<dyn Iterator<Item = Result<u32, ChatError>> + Send>;

/// Model capability: one stateless sampling run per call. Sampling
/// parameters in the config (`temperature`, `top_p`) pass through opaquely.
pub trait Model: Send + Sync {
    fn generate(&self, input: &ModelInput, config: &GenerationConfig)
        -> Result<TokenStream, ChatError>;
}
