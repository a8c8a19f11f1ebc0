//! Role-block dialect: `role\ncontent` blocks wrapped in `<|im_start|>` /
//! `<|im_end|>`, with newest-first window limiting against a token budget.
//!
//! The constructed prompt always tokenizes within `max_window_size`; the
//! oldest context is truncated silently first.

use super::{marker_holdback, strip_markers};
use crate::history::ConversationHistory;
use crate::runtime::Tokenizer;

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";
const MARKERS: [&str; 2] = [IM_START, IM_END];

fn block(role: &str, content: &str) -> String {
    format!("{role}\n{content}")
}

pub fn build_prompt(
    query: &str,
    history: &ConversationHistory,
    tokenizer: &dyn Tokenizer,
    system: &str,
    max_window_size: usize,
) -> String {
    let header = format!("{IM_START}{}{IM_END}", block("system", system));
    let trailer = format!("\n{IM_START}{}{IM_END}\n{IM_START}assistant\n", block("user", query));

    // History gets whatever token budget the fixed frame leaves over.
    let frame_tokens =
        tokenizer.encode(&header).len() + tokenizer.encode(&trailer).len();
    let budget = max_window_size.saturating_sub(frame_tokens);

    let exchanges: Vec<_> = history.exchanges().collect();
    let mut included = String::new();
    for (old_query, response) in exchanges.iter().rev() {
        let prev_chat = format!(
            "\n{IM_START}{}{IM_END}\n{IM_START}{}{IM_END}",
            block("user", old_query),
            block("assistant", response)
        );
        let candidate = format!("{prev_chat}{included}");
        if tokenizer.encode(&candidate).len() <= budget {
            included = candidate;
        } else {
            break;
        }
    }

    format!("{header}{included}{trailer}")
}

pub fn process_response(raw: &str) -> String {
    strip_markers(raw, &MARKERS).trim().to_string()
}

pub fn stream_text(raw: &str) -> String {
    let hold = marker_holdback(raw, &MARKERS);
    strip_markers(&raw[..raw.len() - hold], &MARKERS)
        .trim_start()
        .trim_end()
        .to_string()
}
