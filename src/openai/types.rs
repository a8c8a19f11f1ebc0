//! Wire entities of the chat-completions convention.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        ChatCompletionRequest {
            model: model.into(),
            messages,
            stream: false,
            n: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
        }
    }

    /// Schema validation; failures never reach generation.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.model.is_empty() {
            return Err(ChatError::Validation("model must not be empty".to_string()));
        }
        if self.messages.is_empty() {
            return Err(ChatError::Validation(
                "messages must not be empty".to_string(),
            ));
        }
        for message in &self.messages {
            if message.role.parse::<crate::history::Role>().is_err() {
                return Err(ChatError::Validation(format!(
                    "unknown message role: {}",
                    message.role
                )));
            }
        }
        if self.messages.last().map(|m| m.role.as_str()) != Some("user") {
            return Err(ChatError::Validation(
                "last message must be a user message".to_string(),
            ));
        }
        if self.n == Some(0) {
            return Err(ChatError::Validation("n must be at least 1".to_string()));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ChatError::Validation(format!(
                    "temperature out of range: {t}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub message: ResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
}

impl ChatCompletionResponse {
    /// Content of the first choice, the common single-completion case.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    /// Incremental content of the first choice, if this chunk carries any.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>, kind: impl Into<String>) -> Self {
        ErrorBody {
            error: ErrorDetail {
                message: message.into(),
                kind: kind.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_minimal_payload() {
        let request: ChatCompletionRequest = serde_json::from_str(
            r#"{"model":"m","messages":[{"role":"user","content":"hi"}]}"#,
        )
        .unwrap();
        assert!(!request.stream);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_requests() {
        let mut request =
            ChatCompletionRequest::new("m", vec![ChatMessage::user("hi")]);
        request.messages.clear();
        assert!(request.validate().is_err());

        let request = ChatCompletionRequest::new(
            "m",
            vec![ChatMessage::new("robot", "hi")],
        );
        assert!(request.validate().is_err());

        let request = ChatCompletionRequest::new(
            "m",
            vec![ChatMessage::user("hi"), ChatMessage::assistant("yo")],
        );
        assert!(request.validate().is_err(), "trailing assistant message");

        let mut request = ChatCompletionRequest::new("m", vec![ChatMessage::user("hi")]);
        request.n = Some(0);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_chunk_serializes_without_empty_fields() {
        let chunk = ChatCompletionChunk {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: "m".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: Some("hi".to_string()),
                },
                finish_reason: None,
            }],
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(!json.contains("\"role\""));
        assert!(json.contains("\"finish_reason\":null"));
        let back: ChatCompletionChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content(), Some("hi"));
    }
}
