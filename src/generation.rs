//! The streaming generation loop.
//!
//! Drives [`Model::generate`], accumulates raw tokens, and surfaces the
//! decoded text incrementally. Emission rules:
//!
//! - a delta never splits a multi-byte character: decoded text ending in the
//!   replacement character is withheld until further tokens resolve it;
//! - once a stop sequence appears in the cumulative text, output is
//!   truncated to just before the marker and the run ends; a partial marker
//!   suffix at the tail is withheld until disambiguated;
//! - `max_length` caps generated tokens; with `include_input = false` the
//!   echoed input token count is dropped before the first delta.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::error::ChatError;
use crate::log_debug;
use crate::runtime::{Model, ModelInput, Tokenizer};

/// An incremental fragment of generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextDelta {
    pub text: String,
    pub tokens_used: usize,
    pub max_tokens: usize,
}

/// Shared cancellation flag; the consumer side flips it, the loop observes
/// it every token.
pub type CancelFlag = Arc<AtomicBool>;

#[derive(Clone)]
pub struct GenerationLoop {
    model: Arc<dyn Model>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl GenerationLoop {
    pub fn new(model: Arc<dyn Model>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        GenerationLoop { model, tokenizer }
    }

    /// Run `config.n` independent completions to the end, returning the raw
    /// text of each in the order sampling completed.
    pub fn run(
        &self,
        input: &ModelInput,
        config: &GenerationConfig,
    ) -> Result<Vec<String>, ChatError> {
        let cancel = CancelFlag::default();
        (0..config.n.max(1))
            .map(|_| self.run_one(input, config, &cancel, |_, _| true))
            .collect()
    }

    /// Run a single completion, invoking `observe` with the cumulative safe
    /// text and token count after every emission-worthy step. `observe`
    /// returning `false` cancels the run; the text produced so far is
    /// returned and model-side resources are released immediately (the token
    /// stream is dropped on return).
    pub fn run_one(
        &self,
        input: &ModelInput,
        config: &GenerationConfig,
        cancel: &CancelFlag,
        mut observe: impl FnMut(&str, usize) -> bool,
    ) -> Result<String, ChatError> {
        let started = Instant::now();
        let stream = self.model.generate(input, config)?;

        let echo_len = if config.include_input {
            0
        } else {
            input.token_len(self.tokenizer.as_ref())
        };

        let mut skipped = 0usize;
        let mut ids: Vec<u32> = Vec::new();
        let mut full = String::new();

        for token in stream {
            if cancel.load(Ordering::Relaxed) {
                log_debug!("generation cancelled after {} tokens", ids.len());
                return Ok(full);
            }
            if let Some(timeout) = config.timeout {
                if started.elapsed() > timeout {
                    return Err(ChatError::GenerationTimeout(timeout));
                }
            }

            let token = token?;
            if skipped < echo_len {
                skipped += 1;
                continue;
            }

            ids.push(token);
            let decoded = self.tokenizer.decode(&ids);
            full = complete_prefix(&decoded).to_string();

            if let Some(pos) = first_stop_match(&full, &config.stop_sequences) {
                full.truncate(pos);
                observe(&full, ids.len());
                return Ok(full);
            }

            let hold = stop_holdback(&full, &config.stop_sequences);
            if !observe(&full[..full.len() - hold], ids.len()) {
                return Ok(full);
            }

            if ids.len() >= config.max_length {
                log_debug!("generation hit max_length ({})", config.max_length);
                break;
            }
        }

        // final flush: a withheld stop-marker prefix turned out to be text
        observe(&full, ids.len());
        Ok(full)
    }
}

/// Longest prefix of `text` that ends in fully decoded characters. A trailing
/// run of replacement characters marks an undecodable (likely split) tail.
fn complete_prefix(text: &str) -> &str {
    let mut end = text.len();
    while text[..end].ends_with('\u{FFFD}') {
        end -= '\u{FFFD}'.len_utf8();
    }
    &text[..end]
}

/// Byte position of the earliest stop-sequence occurrence, if any.
fn first_stop_match(text: &str, stop_sequences: &[String]) -> Option<usize> {
    stop_sequences
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
}

/// Byte length of the longest strict stop-sequence prefix dangling at the
/// end of `text`.
fn stop_holdback(text: &str, stop_sequences: &[String]) -> usize {
    let mut hold = 0;
    for stop in stop_sequences {
        for (idx, ch) in stop.char_indices() {
            let boundary = idx + ch.len_utf8();
            if boundary == stop.len() {
                break;
            }
            if text.ends_with(&stop[..boundary]) {
                hold = hold.max(boundary);
            }
        }
    }
    hold
}
