//! Tagged-turn dialect: `<s><|User|>:…<eoh>\n<|Bot|>:…<eoa>\n` exchanges.

use super::{marker_holdback, strip_markers};
use crate::history::ConversationHistory;

const MARKERS: [&str; 4] = ["<s>", "</s>", "<eoh>", "<eoa>"];

pub fn build_prompt(query: &str, history: &ConversationHistory) -> String {
    let mut prompt = String::new();
    for (old_query, response) in history.exchanges() {
        prompt.push_str(&format!(
            "<s><|User|>:{old_query}<eoh>\n<|Bot|>:{response}<eoa>\n"
        ));
    }
    // bare start-of-sequence only when no history rendered
    if prompt.is_empty() {
        prompt.push_str("<s>");
    }
    prompt.push_str(&format!("<|User|>:{query}<eoh>\n<|Bot|>:"));
    prompt
}

pub fn process_response(raw: &str) -> String {
    strip_markers(raw, &MARKERS)
}

pub fn stream_text(raw: &str) -> String {
    let hold = marker_holdback(raw, &MARKERS);
    strip_markers(&raw[..raw.len() - hold], &MARKERS)
}
