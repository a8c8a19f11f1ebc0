//! Token-native dialect: prompt formatting is delegated to the tokenizer's
//! own chat template and responses may carry structured tool calls.
//!
//! Unlike the text dialects, this one maintains an in-progress assistant
//! placeholder inside the history: `build_prompt` appends the user turn plus
//! an empty assistant turn before templating, and `process_response` rewrites
//! that placeholder in place as output accumulates.

use super::{finalize_placeholder, Reply};
use crate::error::ChatError;
use crate::history::{ConversationHistory, Role, Turn};
use crate::runtime::{ModelInput, Tokenizer};
use crate::toolcall;

const ASSISTANT_MARKER: &str = "<|assistant|>";

pub fn build_prompt(
    query: &str,
    history: &mut ConversationHistory,
    tokenizer: &dyn Tokenizer,
) -> Result<ModelInput, ChatError> {
    // detach a stale placeholder from an abandoned round
    history.pop_placeholder();
    history.push_user(query);
    history.push_assistant("");
    let ids = tokenizer.build_chat_input(history)?;
    Ok(ModelInput::Tokens(ids))
}

pub fn process_response(
    raw: &str,
    history: &mut ConversationHistory,
) -> Result<Reply, ChatError> {
    // Truncated multi-byte sequence guard: treat the turn as incomplete and
    // return the previously accumulated content unchanged.
    if raw.is_empty() || raw.ends_with('\u{FFFD}') {
        return Ok(Reply::Text(placeholder_content(history)));
    }

    let mut reply = Reply::Text(String::new());
    for segment in raw.split(ASSISTANT_MARKER) {
        if segment.is_empty() {
            continue;
        }
        let Some((metadata, body)) = segment.split_once('\n') else {
            return Err(ChatError::MalformedToolCall(format!(
                "missing metadata/content split in segment: {segment:?}"
            )));
        };
        let metadata = metadata.trim();
        if metadata.is_empty() {
            let content = body.trim();
            finalize_placeholder(
                history,
                Turn::new(Role::Assistant, content).with_metadata(""),
            );
            reply = Reply::Text(content.to_string());
        } else {
            finalize_placeholder(
                history,
                Turn::new(Role::Assistant, body.trim()).with_metadata(metadata),
            );
            if history.declares_tools() {
                let literal = strip_code_fence(body);
                let parameters = toolcall::parse_parameters(&literal)?;
                reply = Reply::ToolCall {
                    name: metadata.to_string(),
                    parameters,
                };
            } else {
                reply = Reply::NamedContent {
                    name: metadata.to_string(),
                    content: body.trim().to_string(),
                };
            }
        }
    }
    Ok(reply)
}

/// Streaming emission: only resolved plain-text content is stable. Tool-call
/// segments are withheld until finalization.
pub fn stream_text(raw: &str) -> String {
    let raw = raw.strip_suffix('\u{FFFD}').unwrap_or(raw);
    let segment = raw.rsplit(ASSISTANT_MARKER).next().unwrap_or(raw);
    match segment.split_once('\n') {
        Some((metadata, body)) if metadata.trim().is_empty() => {
            body.trim_start().trim_end().to_string()
        }
        // metadata line still forming, or a tool-call segment
        _ => String::new(),
    }
}

fn placeholder_content(history: &ConversationHistory) -> String {
    match history.last() {
        Some(turn) if turn.role == Role::Assistant => turn.content.clone(),
        _ => String::new(),
    }
}

fn strip_code_fence(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.starts_with("```") {
        let inner: Vec<&str> = trimmed.lines().collect();
        if inner.len() >= 2 {
            return inner[1..inner.len() - 1].join("\n");
        }
    }
    trimmed.to_string()
}
