//! Mock runtime capabilities for tests and the `chatframe-server` binary's
//! built-in backend.

use crate::config::GenerationConfig;
use crate::error::ChatError;
use crate::history::ConversationHistory;
use crate::runtime::{Model, ModelInput, TokenStream, Tokenizer};

/// Byte-level tokenizer: one token per byte. Multi-byte UTF-8 characters
/// deliberately span several tokens, exercising the loop's
/// replacement-character buffering.
pub struct MockTokenizer;

impl Tokenizer for MockTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        text.bytes().map(u32::from).collect()
    }

    fn decode(&self, ids: &[u32]) -> String {
        let bytes: Vec<u8> = ids.iter().map(|&id| id as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn build_chat_input(&self, history: &ConversationHistory) -> Result<Vec<u32>, ChatError> {
        let mut rendered = String::new();
        for turn in history.turns() {
            rendered.push_str(&format!("<|{}|>\n{}\n", turn.role, turn.content));
        }
        Ok(self.encode(&rendered))
    }
}

/// Deterministic model: echoes its input, then emits a scripted reply.
pub struct MockModel {
    reply: String,
}

impl MockModel {
    pub fn new(reply: impl Into<String>) -> Self {
        MockModel {
            reply: reply.into(),
        }
    }
}

impl Model for MockModel {
    fn generate(
        &self,
        input: &ModelInput,
        _config: &GenerationConfig,
    ) -> Result<TokenStream, ChatError> {
        let tokenizer = MockTokenizer;
        let mut ids = match input {
            ModelInput::Text(text) => tokenizer.encode(text),
            ModelInput::Tokens(ids) => ids.clone(),
        };
        ids.extend(tokenizer.encode(&self.reply));
        Ok(Box::new(ids.into_iter().map(Ok)))
    }
}
