//! ChatService: orchestrates prompt construction, the generation loop and
//! response decoding behind one front-end-agnostic surface.
//!
//! One service + history pair per logical session, driven sequentially;
//! concurrent calls against the same history are not a supported
//! configuration. The model and tokenizer behind their `Arc`s are shared
//! freely across sessions (stateless inference calls).

use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::config::GenerationConfig;
use crate::dialect::{Dialect, Reply};
use crate::error::ChatError;
use crate::generation::{CancelFlag, GenerationLoop, TextDelta};
use crate::history::{ConversationHistory, Role, Turn};
use crate::log_warn;
use crate::runtime::{Model, ModelInput, Tokenizer};

#[derive(Clone)]
pub struct ChatService {
    tokenizer: Arc<dyn Tokenizer>,
    dialect: Dialect,
    config: GenerationConfig,
    generation: GenerationLoop,
}

impl ChatService {
    pub fn new(model: Arc<dyn Model>, tokenizer: Arc<dyn Tokenizer>, dialect: Dialect) -> Self {
        Self::with_config(model, tokenizer, dialect, GenerationConfig::default())
    }

    pub fn with_config(
        model: Arc<dyn Model>,
        tokenizer: Arc<dyn Tokenizer>,
        dialect: Dialect,
        mut config: GenerationConfig,
    ) -> Self {
        if config.stop_sequences.is_empty() {
            config.stop_sequences = dialect.stop_sequences();
        }
        ChatService {
            generation: GenerationLoop::new(model, Arc::clone(&tokenizer)),
            tokenizer,
            dialect,
            config,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    /// One full round: build the prompt, generate, decode, and append the
    /// finalized assistant turn to `history` exactly once.
    pub fn chat(
        &self,
        query: &str,
        history: &mut ConversationHistory,
    ) -> Result<Reply, ChatError> {
        self.chat_with(query, history, &self.config)
    }

    pub fn chat_with(
        &self,
        query: &str,
        history: &mut ConversationHistory,
        config: &GenerationConfig,
    ) -> Result<Reply, ChatError> {
        let input = self
            .dialect
            .build_prompt(query, history, self.tokenizer.as_ref())?;
        let raw = self
            .generation
            .run(&input, config)?
            .into_iter()
            .next()
            .unwrap_or_default();
        let reply = self.process(&raw, history)?;
        self.finalize(query, &reply, history);
        Ok(reply)
    }

    /// Batch form: one independent generation per query, each against a
    /// private clone of `history`; the caller's history is untouched.
    pub fn chat_batch(
        &self,
        queries: &[String],
        history: &ConversationHistory,
    ) -> Vec<Result<Reply, ChatError>> {
        queries
            .iter()
            .map(|query| {
                let mut private = history.clone();
                self.chat(query, &mut private)
            })
            .collect()
    }

    /// `config.n` completions for one query without mutating the caller's
    /// history. Used by the stateless wire layer.
    pub fn complete(
        &self,
        query: &str,
        history: &ConversationHistory,
        config: &GenerationConfig,
    ) -> Result<Vec<Reply>, ChatError> {
        let mut scratch = history.clone();
        let input = self
            .dialect
            .build_prompt(query, &mut scratch, self.tokenizer.as_ref())?;
        let raws = self.generation.run(&input, config)?;
        raws.iter()
            .map(|raw| {
                let mut private = scratch.clone();
                self.process(raw, &mut private)
            })
            .collect()
    }

    /// Raw loop access: no dialect processing, `config.n` completions.
    pub fn generate(
        &self,
        input: &ModelInput,
        config: &GenerationConfig,
    ) -> Result<Vec<String>, ChatError> {
        self.generation.run(input, config)
    }

    /// Lazy finite stream of text deltas. Concatenating every delta equals
    /// the text of the non-streaming `chat` for a deterministic generation.
    /// The caller's history is not mutated; the caller finalizes the turn.
    pub fn stream_chat(
        &self,
        query: &str,
        history: &ConversationHistory,
    ) -> Result<DeltaStream, ChatError> {
        self.stream_chat_with(query, history, self.config.clone())
    }

    pub fn stream_chat_with(
        &self,
        query: &str,
        history: &ConversationHistory,
        config: GenerationConfig,
    ) -> Result<DeltaStream, ChatError> {
        let mut scratch = history.clone();
        let input = self
            .dialect
            .build_prompt(query, &mut scratch, self.tokenizer.as_ref())?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancelFlag::default();
        let worker_cancel = Arc::clone(&cancel);
        let generation = self.generation.clone();
        let dialect = self.dialect.clone();

        std::thread::spawn(move || {
            let max_tokens = config.max_length;
            let mut emitted = String::new();
            let mut last_tokens = 0usize;
            let result = generation.run_one(&input, &config, &worker_cancel, |cumulative, tokens_used| {
                last_tokens = tokens_used;
                let stable = dialect.stream_text(cumulative);
                if stable.len() > emitted.len() && stable.starts_with(&emitted) {
                    let delta = stable[emitted.len()..].to_string();
                    emitted.push_str(&delta);
                    if tx
                        .send(Ok(TextDelta {
                            text: delta,
                            tokens_used,
                            max_tokens,
                        }))
                        .is_err()
                    {
                        return false; // consumer gone
                    }
                }
                true
            });

            match result {
                Ok(raw) => {
                    let final_text = match dialect.process_response(&raw, &mut scratch) {
                        Ok(reply) => reply.render_text(),
                        Err(err) if err.is_recoverable() => {
                            log_warn!("stream response degraded to plain text: {err}");
                            raw.trim().to_string()
                        }
                        Err(err) => {
                            let _ = tx.send(Err(err));
                            return;
                        }
                    };
                    // top up whatever the streaming holdbacks withheld
                    if final_text.len() > emitted.len() && final_text.starts_with(&emitted) {
                        let _ = tx.send(Ok(TextDelta {
                            text: final_text[emitted.len()..].to_string(),
                            tokens_used: last_tokens,
                            max_tokens,
                        }));
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err));
                }
            }
        });

        Ok(DeltaStream { rx, cancel })
    }

    fn process(
        &self,
        raw: &str,
        history: &mut ConversationHistory,
    ) -> Result<Reply, ChatError> {
        match self.dialect.process_response(raw, history) {
            Ok(reply) => Ok(reply),
            Err(err) if err.is_recoverable() => {
                log_warn!("response parse degraded to plain text: {err}");
                Ok(Reply::Text(raw.trim().to_string()))
            }
            Err(err) => Err(err),
        }
    }

    fn finalize(&self, query: &str, reply: &Reply, history: &mut ConversationHistory) {
        match self.dialect {
            // the placeholder was rewritten in place during processing; fill
            // it only if the degraded-parse path left it empty
            Dialect::TokenNative => {
                let needs_fill = matches!(
                    history.last(),
                    Some(turn) if turn.role == Role::Assistant && turn.content.is_empty()
                );
                if needs_fill {
                    history.replace_last(Turn::new(Role::Assistant, reply.render_text()));
                }
            }
            _ => {
                history.push_user(query);
                history.push_assistant(reply.render_text());
            }
        }
    }
}

/// Lazy finite stream of [`TextDelta`]; not restartable. Dropping it cancels
/// the generation within one scheduling step.
pub struct DeltaStream {
    rx: mpsc::UnboundedReceiver<Result<TextDelta, ChatError>>,
    cancel: CancelFlag,
}

impl DeltaStream {
    /// Explicit early stop; equivalent to dropping the stream.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Blocking pull, for synchronous consumers.
    pub fn blocking_next(&mut self) -> Option<Result<TextDelta, ChatError>> {
        self.rx.blocking_recv()
    }
}

impl Stream for DeltaStream {
    type Item = Result<TextDelta, ChatError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for DeltaStream {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::RoundNumbering;
    use crate::mock::{MockModel, MockTokenizer};

    fn service(reply: &str, dialect: Dialect) -> ChatService {
        ChatService::new(
            Arc::new(MockModel::new(reply)),
            Arc::new(MockTokenizer),
            dialect,
        )
    }

    fn round_service(reply: &str) -> ChatService {
        service(
            reply,
            Dialect::Round {
                numbering: RoundNumbering::ZeroIndexed,
            },
        )
    }

    #[test]
    fn test_chat_appends_finalized_turns_once() {
        let service = round_service("hello there");
        let mut history = ConversationHistory::new();
        let reply = service.chat("hi", &mut history).unwrap();
        assert_eq!(reply.as_text(), Some("hello there"));
        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].content, "hi");
        assert_eq!(history.turns()[1].content, "hello there");
    }

    #[test]
    fn test_second_round_uses_grown_history() {
        let service = round_service("second reply");
        let mut history = ConversationHistory::from_pairs(&[("hi", "hello")]);
        service.chat("again", &mut history).unwrap();
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_chat_batch_leaves_history_untouched() {
        let service = round_service("answer");
        let history = ConversationHistory::from_pairs(&[("hi", "hello")]);
        let replies = service.chat_batch(
            &["one".to_string(), "two".to_string()],
            &history,
        );
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r.is_ok()));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_streaming_concat_equals_chat() {
        let reply = "你好, 世界! a longer deterministic answer";
        let stream_service = round_service(reply);
        let history = ConversationHistory::from_pairs(&[("q", "a")]);

        let mut stream = stream_service.stream_chat("hi", &history).unwrap();
        let mut streamed = String::new();
        while let Some(item) = stream.blocking_next() {
            streamed.push_str(&item.unwrap().text);
        }

        let chat_service = round_service(reply);
        let mut chat_history = history.clone();
        let direct = chat_service.chat("hi", &mut chat_history).unwrap();
        assert_eq!(streamed, direct.as_text().unwrap());
    }

    #[test]
    fn test_token_native_tool_call_round() {
        let service = service("get_weather\n\ncity='Paris'", Dialect::TokenNative);
        let mut history = ConversationHistory::new();
        history.push(
            Turn::new(Role::System, "You may call tools").with_metadata("tools"),
        );
        let reply = service.chat("weather in paris?", &mut history).unwrap();
        assert_eq!(
            reply,
            Reply::ToolCall {
                name: "get_weather".to_string(),
                parameters: serde_json::json!({"city": "Paris"}),
            }
        );
        // placeholder finalized with the tool metadata
        let last = history.last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.metadata.as_deref(), Some("get_weather"));
    }

    #[test]
    fn test_malformed_tool_call_degrades_to_text() {
        let service = service("no-newline-split", Dialect::TokenNative);
        let mut history = ConversationHistory::new();
        let reply = service.chat("hi", &mut history).unwrap();
        assert_eq!(reply.as_text(), Some("no-newline-split"));
        // degraded reply still finalizes the placeholder
        assert_eq!(history.last().unwrap().content, "no-newline-split");
    }

    #[test]
    fn test_generate_returns_raw_completions() {
        let service = round_service("raw text");
        let out = service
            .generate(
                &ModelInput::Text("p".to_string()),
                &GenerationConfig {
                    n: 2,
                    ..GenerationConfig::default()
                },
            )
            .unwrap();
        assert_eq!(out, vec!["raw text".to_string(), "raw text".to_string()]);
    }

    #[test]
    fn test_dropping_stream_cancels_generation() {
        let service = round_service("a very long reply that would keep streaming for a while");
        let history = ConversationHistory::new();
        let mut stream = service.stream_chat("hi", &history).unwrap();
        let first = stream.blocking_next();
        assert!(first.is_some());
        let cancel = Arc::clone(&stream.cancel);
        drop(stream);
        assert!(cancel.load(Ordering::Relaxed));
    }
}
