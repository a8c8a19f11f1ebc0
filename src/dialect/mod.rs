//! Per-model-family prompt construction and response decoding.
//!
//! Each model dialect is a small pure-function pair: `build_prompt` turns
//! (history, query) into a [`ModelInput`] and `process_response` turns raw
//! decoded text back into a [`Reply`]. The token-native dialect additionally
//! maintains an in-progress assistant placeholder inside the history.

pub mod punct;
mod role_block;
mod round;
mod tagged;
mod token_native;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::history::{ConversationHistory, Role, Turn};
use crate::runtime::{ModelInput, Tokenizer};

/// A decoded assistant reply: plain text, a structured tool invocation, or a
/// named sub-content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Text(String),
    ToolCall {
        name: String,
        parameters: serde_json::Value,
    },
    NamedContent {
        name: String,
        content: String,
    },
}

impl Reply {
    /// Flat text rendering, used by the wire layer's `content` field.
    pub fn render_text(&self) -> String {
        match self {
            Reply::Text(text) => text.clone(),
            Reply::ToolCall { name, parameters } => serde_json::json!({
                "name": name,
                "parameters": parameters,
            })
            .to_string(),
            Reply::NamedContent { content, .. } => content.clone(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Reply::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Which numbering convention the round-numbered dialect uses. The two
/// conventions coexist across model generations; pick one per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundNumbering {
    /// First exchange is `[Round 0]`; an empty history collapses the prompt
    /// to the bare query.
    #[default]
    ZeroIndexed,
    /// First exchange is `[Round 1]`, blocks separated by blank lines.
    OneIndexed,
}

/// Model dialect, selected at session construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Dialect {
    /// `[Round i]\n问：…\n答：…` exchanges.
    Round { numbering: RoundNumbering },
    /// `<s><|User|>:…<eoh>\n<|Bot|>:…<eoa>\n` exchanges.
    Tagged,
    /// `<|im_start|>role\ncontent<|im_end|>` blocks, newest-first window
    /// limiting against a token budget.
    RoleBlock {
        system: String,
        max_window_size: usize,
    },
    /// Formatting delegated to the tokenizer's chat template; responses may
    /// carry structured tool calls.
    TokenNative,
}

impl Dialect {
    /// Turn (history, query) into a model input. Deterministic in its
    /// inputs; only the token-native variant mutates `history`, appending
    /// the user turn and an in-progress assistant placeholder.
    pub fn build_prompt(
        &self,
        query: &str,
        history: &mut ConversationHistory,
        tokenizer: &dyn Tokenizer,
    ) -> Result<ModelInput, ChatError> {
        match self {
            Dialect::Round { numbering } => {
                validate_roles(history, &[Role::User, Role::Assistant])?;
                Ok(ModelInput::Text(round::build_prompt(
                    query, history, *numbering,
                )))
            }
            Dialect::Tagged => {
                validate_roles(history, &[Role::User, Role::Assistant])?;
                Ok(ModelInput::Text(tagged::build_prompt(query, history)))
            }
            Dialect::RoleBlock {
                system,
                max_window_size,
            } => {
                validate_roles(history, &[Role::System, Role::User, Role::Assistant])?;
                Ok(ModelInput::Text(role_block::build_prompt(
                    query,
                    history,
                    tokenizer,
                    history.system().unwrap_or(system),
                    *max_window_size,
                )))
            }
            Dialect::TokenNative => token_native::build_prompt(query, history, tokenizer),
        }
    }

    /// Decode raw model output into a reply. Idempotent-safe on growing
    /// prefixes: repeated calls never corrupt earlier content.
    pub fn process_response(
        &self,
        raw: &str,
        history: &mut ConversationHistory,
    ) -> Result<Reply, ChatError> {
        match self {
            Dialect::Round { .. } => Ok(Reply::Text(round::process_response(raw))),
            Dialect::Tagged => Ok(Reply::Text(tagged::process_response(raw))),
            Dialect::RoleBlock { .. } => Ok(Reply::Text(role_block::process_response(raw))),
            Dialect::TokenNative => token_native::process_response(raw, history),
        }
    }

    /// Stable processed prefix of `raw` safe to emit during streaming.
    /// Characters that a later rule could rewrite (trailing normalizable
    /// punctuation, partial sentinel markers) are withheld until resolved.
    pub fn stream_text(&self, raw: &str) -> String {
        match self {
            Dialect::Round { .. } => round::stream_text(raw),
            Dialect::Tagged => tagged::stream_text(raw),
            Dialect::RoleBlock { .. } => role_block::stream_text(raw),
            Dialect::TokenNative => token_native::stream_text(raw),
        }
    }

    /// Default stop sequences of this dialect, merged into the generation
    /// config when the caller supplies none.
    pub fn stop_sequences(&self) -> Vec<String> {
        match self {
            Dialect::Round { .. } => vec![],
            Dialect::Tagged => vec!["<eoa>".to_string(), "</s>".to_string()],
            Dialect::RoleBlock { .. } => vec!["<|im_end|>".to_string()],
            Dialect::TokenNative => vec!["<|user|>".to_string()],
        }
    }
}

fn validate_roles(history: &ConversationHistory, allowed: &[Role]) -> Result<(), ChatError> {
    for turn in history.turns() {
        if !allowed.contains(&turn.role) {
            return Err(ChatError::UnsupportedRole(turn.role.to_string()));
        }
    }
    Ok(())
}

/// Remove every occurrence of the given sentinel markers.
pub(crate) fn strip_markers(text: &str, markers: &[&str]) -> String {
    let mut out = text.to_string();
    for marker in markers {
        out = out.replace(marker, "");
    }
    out
}

/// Byte length of the longest strict marker prefix dangling at the end of
/// `text`. Streaming emission withholds that suffix until the marker either
/// completes (and is stripped) or turns out to be plain text.
pub(crate) fn marker_holdback(text: &str, markers: &[&str]) -> usize {
    let mut hold = 0;
    for marker in markers {
        for (idx, ch) in marker.char_indices() {
            let boundary = idx + ch.len_utf8();
            if boundary == marker.len() {
                break; // full marker handled by strip, not holdback
            }
            if text.ends_with(&marker[..boundary]) {
                hold = hold.max(boundary);
            }
        }
    }
    hold
}

pub(crate) fn finalize_placeholder(history: &mut ConversationHistory, turn: Turn) {
    history.replace_last(turn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTokenizer;

    #[test]
    fn test_build_prompt_is_deterministic() {
        let tokenizer = MockTokenizer;
        for dialect in [
            Dialect::Round {
                numbering: RoundNumbering::ZeroIndexed,
            },
            Dialect::Tagged,
            Dialect::RoleBlock {
                system: "sys".to_string(),
                max_window_size: 512,
            },
        ] {
            let mut h1 = ConversationHistory::from_pairs(&[("hi", "hello")]);
            let mut h2 = h1.clone();
            let a = dialect.build_prompt("bye", &mut h1, &tokenizer).unwrap();
            let b = dialect.build_prompt("bye", &mut h2, &tokenizer).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_unsupported_role_rejected() {
        let tokenizer = MockTokenizer;
        let mut history = ConversationHistory::new();
        history.push(Turn::new(Role::Tool, "output"));
        let dialect = Dialect::Round {
            numbering: RoundNumbering::ZeroIndexed,
        };
        let err = dialect
            .build_prompt("hi", &mut history, &tokenizer)
            .unwrap_err();
        assert!(matches!(err, ChatError::UnsupportedRole(_)));
    }

    #[test]
    fn test_marker_holdback_detects_partial_sentinels() {
        let markers = ["<eoa>", "</s>"];
        assert_eq!(marker_holdback("text<eo", &markers), 3);
        assert_eq!(marker_holdback("text<", &markers), 1);
        assert_eq!(marker_holdback("text", &markers), 0);
        // a complete marker is not a holdback case
        assert_eq!(marker_holdback("text<eoa>", &markers), 0);
    }

    #[test]
    fn test_reply_render_text_for_tool_call() {
        let reply = Reply::ToolCall {
            name: "get_weather".to_string(),
            parameters: serde_json::json!({"city": "Paris"}),
        };
        let rendered = reply.render_text();
        assert!(rendered.contains("get_weather"));
        assert!(rendered.contains("Paris"));
    }
}
