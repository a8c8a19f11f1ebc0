//! Blocking client for chat-completions endpoints.

use std::io::Read;
use std::time::Duration;

use crate::error::ChatError;
use crate::log_debug;
use crate::openai::sse::{SseEvent, SseParser};
use crate::openai::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ErrorBody,
};

pub struct OpenAiClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// `base_url` without a trailing slash, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .build();
        OpenAiClient {
            agent,
            base_url: base_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn post(&self, request: &ChatCompletionRequest) -> Result<ureq::Response, ChatError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut req = self.agent.post(&url).set("content-type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.set("authorization", &format!("Bearer {key}"));
        }
        match req.send_string(&serde_json::to_string(request)?) {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(status, response)) => {
                let message = response
                    .into_string()
                    .ok()
                    .and_then(|body| serde_json::from_str::<ErrorBody>(&body).ok())
                    .map(|body| body.error.message)
                    .unwrap_or_else(|| "unknown server error".to_string());
                Err(ChatError::Api { status, message })
            }
            Err(ureq::Error::Transport(e)) => Err(ChatError::Transport(e.to_string())),
        }
    }

    pub fn chat(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, ChatError> {
        let mut request = request.clone();
        request.stream = false;
        let response = self.post(&request)?;
        Ok(response.into_json()?)
    }

    /// Streaming completion: an iterator of content fragments, finished by
    /// the server's terminal sentinel. Ending without the sentinel is a
    /// truncated stream and surfaces as an error item.
    pub fn stream_chat(&self, request: &ChatCompletionRequest) -> Result<ChatStream, ChatError> {
        let mut request = request.clone();
        request.stream = true;
        let response = self.post(&request)?;
        log_debug!("stream opened: {}", response.status());
        Ok(ChatStream {
            reader: response.into_reader(),
            parser: SseParser::new(),
            pending: Vec::new(),
            done: false,
        })
    }
}

pub struct ChatStream {
    reader: Box<dyn Read + Send + Sync + 'static>,
    parser: SseParser,
    pending: Vec<SseEvent>,
    done: bool,
}

impl ChatStream {
    fn next_event(&mut self) -> Result<Option<SseEvent>, ChatError> {
        loop {
            if !self.pending.is_empty() {
                return Ok(Some(self.pending.remove(0)));
            }
            let mut chunk = [0u8; 4096];
            let n = self
                .reader
                .read(&mut chunk)
                .map_err(|e| ChatError::Transport(e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            self.pending = self.parser.push(&chunk[..n]);
        }
    }
}

impl Iterator for ChatStream {
    type Item = Result<String, ChatError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.next_event() {
                Ok(Some(SseEvent::Done)) => {
                    self.done = true;
                    return None;
                }
                Ok(Some(SseEvent::Error(data))) => {
                    self.done = true;
                    // server error frames carry {"error": "message"}
                    let message = serde_json::from_str::<serde_json::Value>(&data)
                        .ok()
                        .and_then(|v| v.get("error")?.as_str().map(str::to_string))
                        .unwrap_or(data);
                    return Some(Err(ChatError::Runtime(message)));
                }
                Ok(Some(SseEvent::Data(data))) => {
                    match serde_json::from_str::<ChatCompletionChunk>(&data) {
                        Ok(chunk) => match chunk.content() {
                            Some(text) if !text.is_empty() => {
                                return Some(Ok(text.to_string()));
                            }
                            _ => continue, // role or finish_reason chunk
                        },
                        Err(e) => {
                            self.done = true;
                            return Some(Err(ChatError::Json(e)));
                        }
                    }
                }
                Ok(None) => {
                    // EOF before the terminal sentinel
                    self.done = true;
                    return Some(Err(ChatError::StreamTerminated));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_from(wire: &[u8]) -> ChatStream {
        ChatStream {
            reader: Box::new(std::io::Cursor::new(wire.to_vec())),
            parser: SseParser::new(),
            pending: Vec::new(),
            done: false,
        }
    }

    fn content_chunk(text: &str) -> String {
        format!(
            r#"data: {{"id":"c","object":"chat.completion.chunk","created":0,"model":"m","choices":[{{"index":0,"delta":{{"content":"{text}"}},"finish_reason":null}}]}}"#
        )
    }

    #[test]
    fn test_stream_yields_content_fragments() {
        let wire = format!(
            "{}\n\n{}\n\ndata: [DONE]\n\n",
            content_chunk("Hel"),
            content_chunk("lo")
        );
        let fragments: Vec<String> = stream_from(wire.as_bytes())
            .map(Result::unwrap)
            .collect();
        assert_eq!(fragments, vec!["Hel".to_string(), "lo".to_string()]);
    }

    #[test]
    fn test_truncated_stream_is_an_error() {
        let wire = format!("{}\n\n", content_chunk("partial"));
        let items: Vec<Result<String, ChatError>> = stream_from(wire.as_bytes()).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        assert!(matches!(items[1], Err(ChatError::StreamTerminated)));
    }

    #[test]
    fn test_server_error_frame_surfaces_its_message() {
        let wire = format!(
            "{}\n\nevent: error\ndata: {}\n\n",
            content_chunk("partial"),
            r#"{"error":"generation timed out after 30s"}"#,
        );
        let items: Vec<Result<String, ChatError>> = stream_from(wire.as_bytes()).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        match &items[1] {
            Err(ChatError::Runtime(message)) => {
                assert_eq!(message, "generation timed out after 30s");
            }
            other => panic!("expected the relayed server error, got {other:?}"),
        }
    }

    #[test]
    fn test_role_and_finish_chunks_are_skipped() {
        let wire = format!(
            "data: {}\n\n{}\n\ndata: {}\n\ndata: [DONE]\n\n",
            r#"{"id":"c","object":"chat.completion.chunk","created":0,"model":"m","choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#,
            content_chunk("hi"),
            r#"{"id":"c","object":"chat.completion.chunk","created":0,"model":"m","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        );
        let fragments: Vec<String> = stream_from(wire.as_bytes())
            .map(Result::unwrap)
            .collect();
        assert_eq!(fragments, vec!["hi".to_string()]);
    }
}
