//! Chat-completions HTTP endpoint on hyper.
//!
//! Routes:
//! - `GET  /health` — liveness probe
//! - `POST /v1/chat/completions` — non-streaming and SSE streaming
//! - `OPTIONS *` — CORS preflight

use std::convert::Infallible;
use std::sync::Arc;

use futures_util::StreamExt;
use hyper::body::Bytes;
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use uuid::Uuid;

use crate::config::GenerationConfig;
use crate::error::ChatError;
use crate::history::{ConversationHistory, Role, Turn};
use crate::openai::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice, ChunkChoice,
    Delta, ErrorBody, ResponseMessage,
};
use crate::service::ChatService;
use crate::{log_error, log_info};

const CORS_ORIGIN: &str = "*";
const CORS_METHODS: &str = "GET, POST, OPTIONS";
const CORS_HEADERS: &str = "content-type, authorization";

pub struct ServerContext {
    pub service: ChatService,
    pub model_name: String,
}

impl ServerContext {
    pub fn new(service: ChatService, model_name: impl Into<String>) -> Self {
        ServerContext {
            service,
            model_name: model_name.into(),
        }
    }
}

pub async fn handle_request(
    req: Request<Body>,
    ctx: Arc<ServerContext>,
) -> Result<Response<Body>, Infallible> {
    if req.method() == Method::OPTIONS {
        return Ok(cors_preflight());
    }
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => Ok(json_response(
            StatusCode::OK,
            &serde_json::json!({ "status": "ok", "model": ctx.model_name }),
        )),
        (&Method::POST, "/v1/chat/completions") => Ok(handle_chat_completions(req, ctx).await),
        _ => Ok(json_response(
            StatusCode::NOT_FOUND,
            &ErrorBody::new("unknown route", "invalid_request_error"),
        )),
    }
}

async fn handle_chat_completions(
    req: Request<Body>,
    ctx: Arc<ServerContext>,
) -> Response<Body> {
    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorBody::new(format!("failed to read body: {e}"), "invalid_request_error"),
            );
        }
    };

    let request: ChatCompletionRequest = match serde_json::from_slice(&bytes) {
        Ok(request) => request,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorBody::new(format!("malformed request: {e}"), "invalid_request_error"),
            );
        }
    };
    if let Err(e) = request.validate() {
        return json_response(
            StatusCode::BAD_REQUEST,
            &ErrorBody::new(e.to_string(), "invalid_request_error"),
        );
    }

    log_info!(
        "chat completion: model={} messages={} stream={}",
        request.model,
        request.messages.len(),
        request.stream
    );

    // every request carries its full context; nothing persists between calls.
    // roles are carried through verbatim so the dialect can reject the ones
    // it has no meaning for
    let mut history = ConversationHistory::new();
    let (query, context) = request.messages.split_last().expect("validated non-empty");
    for message in context {
        match message.role.parse::<Role>() {
            Ok(role) => history.push(Turn::new(role, &message.content)),
            Err(e) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    &ErrorBody::new(e, "invalid_request_error"),
                );
            }
        }
    }
    let query = query.content.clone();
    let config = request_config(ctx.service.config(), &request);

    if request.stream {
        stream_response(ctx, query, history, config, request.model).await
    } else {
        full_response(ctx, query, history, config, request.model).await
    }
}

async fn full_response(
    ctx: Arc<ServerContext>,
    query: String,
    history: ConversationHistory,
    config: GenerationConfig,
    model: String,
) -> Response<Body> {
    let service = ctx.service.clone();
    let result =
        tokio::task::spawn_blocking(move || service.complete(&query, &history, &config)).await;

    let replies = match result {
        Ok(Ok(replies)) => replies,
        Ok(Err(e)) => return error_response(&e),
        Err(e) => {
            log_error!("completion task panicked: {e}");
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &ErrorBody::new("completion task failed", "internal_error"),
            );
        }
    };

    let choices = replies
        .into_iter()
        .enumerate()
        .map(|(index, reply)| Choice {
            index,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: reply.render_text(),
            },
            finish_reason: Some("stop".to_string()),
        })
        .collect();

    let response = ChatCompletionResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model,
        choices,
    };
    json_response(StatusCode::OK, &response)
}

async fn stream_response(
    ctx: Arc<ServerContext>,
    query: String,
    history: ConversationHistory,
    config: GenerationConfig,
    model: String,
) -> Response<Body> {
    let mut stream = match ctx.service.stream_chat_with(&query, &history, config) {
        Ok(stream) => stream,
        Err(e) => return error_response(&e),
    };

    let id = completion_id();
    let created = chrono::Utc::now().timestamp();
    let (mut sender, body) = Body::channel();

    tokio::spawn(async move {
        let role_chunk = chunk(&id, created, &model, Some("assistant".to_string()), None, None);
        if send_event(&mut sender, &role_chunk).await.is_err() {
            return;
        }

        while let Some(delta) = stream.next().await {
            match delta {
                Ok(delta) => {
                    let event =
                        chunk(&id, created, &model, None, Some(delta.text), None);
                    if send_event(&mut sender, &event).await.is_err() {
                        // client disconnected; dropping the stream cancels
                        // the generation
                        return;
                    }
                }
                Err(e) => {
                    log_error!("stream generation failed: {e}");
                    let event = format!(
                        "event: error\ndata: {}\n\n",
                        serde_json::json!({ "error": e.to_string() })
                    );
                    let _ = sender.send_data(Bytes::from(event)).await;
                    return;
                }
            }
        }

        let finish = chunk(&id, created, &model, None, None, Some("stop".to_string()));
        if send_event(&mut sender, &finish).await.is_ok() {
            let _ = sender.send_data(Bytes::from("data: [DONE]\n\n")).await;
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("access-control-allow-origin", CORS_ORIGIN)
        .header("connection", "keep-alive")
        .header("x-accel-buffering", "no")
        .body(body)
        .unwrap()
}

/// Per-request generation settings on top of the service defaults.
fn request_config(base: &GenerationConfig, request: &ChatCompletionRequest) -> GenerationConfig {
    let mut config = base.clone();
    if let Some(n) = request.n {
        config.n = n;
    }
    if let Some(max_tokens) = request.max_tokens {
        config.max_length = max_tokens;
    }
    if request.temperature.is_some() {
        config.temperature = request.temperature;
    }
    if request.top_p.is_some() {
        config.top_p = request.top_p;
    }
    if let Some(stop) = &request.stop {
        config.stop_sequences = stop.clone();
    }
    config
}

fn chunk(
    id: &str,
    created: i64,
    model: &str,
    role: Option<String>,
    content: Option<String>,
    finish_reason: Option<String>,
) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Delta { role, content },
            finish_reason,
        }],
    }
}

async fn send_event(
    sender: &mut hyper::body::Sender,
    chunk: &ChatCompletionChunk,
) -> Result<(), ()> {
    let json = serde_json::to_string(chunk).map_err(|_| ())?;
    sender
        .send_data(Bytes::from(format!("data: {json}\n\n")))
        .await
        .map_err(|_| ())
}

fn completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

fn error_response(error: &ChatError) -> Response<Body> {
    log_error!("chat completion failed: {error}");
    let status = match error {
        ChatError::Validation(_) | ChatError::UnsupportedRole(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let kind = if status == StatusCode::BAD_REQUEST {
        "invalid_request_error"
    } else {
        "internal_error"
    };
    json_response(status, &ErrorBody::new(error.to_string(), kind))
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let json = serde_json::to_string(body)
        .unwrap_or_else(|_| r#"{"error":{"message":"serialization failed","type":"internal_error"}}"#.to_string());
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header("access-control-allow-origin", CORS_ORIGIN)
        .header("access-control-allow-methods", CORS_METHODS)
        .header("access-control-allow-headers", CORS_HEADERS)
        .body(Body::from(json))
        .unwrap()
}

fn cors_preflight() -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header("access-control-allow-origin", CORS_ORIGIN)
        .header("access-control-allow-methods", CORS_METHODS)
        .header("access-control-allow-headers", CORS_HEADERS)
        .body(Body::empty())
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Dialect, RoundNumbering};
    use crate::mock::{MockModel, MockTokenizer};
    use crate::openai::sse::{SseEvent, SseParser};

    fn dialect_context(reply: &str, dialect: Dialect) -> Arc<ServerContext> {
        let service = ChatService::new(
            Arc::new(MockModel::new(reply)),
            Arc::new(MockTokenizer),
            dialect,
        );
        Arc::new(ServerContext::new(service, "mock-model"))
    }

    fn test_context(reply: &str) -> Arc<ServerContext> {
        dialect_context(reply, Dialect::TokenNative)
    }

    fn completion_request(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/v1/chat/completions")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = handle_request(req, test_context("")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/v2/nothing")
            .body(Body::empty())
            .unwrap();
        let response = handle_request(req, test_context("")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_request_is_400_with_error_body() {
        let req = completion_request(r#"{"model":"m","messages":[]}"#);
        let response = handle_request(req, test_context("")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error.kind, "invalid_request_error");
    }

    #[tokio::test]
    async fn test_tool_role_rejected_by_text_dialect() {
        let ctx = dialect_context(
            "answer",
            Dialect::Round {
                numbering: RoundNumbering::ZeroIndexed,
            },
        );
        let req = completion_request(
            r#"{"model":"m","messages":[{"role":"tool","content":"lookup output"},{"role":"user","content":"hi"}]}"#,
        );
        let response = handle_request(req, ctx).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error.kind, "invalid_request_error");
        assert!(body.error.message.contains("tool"));
    }

    #[tokio::test]
    async fn test_completion_round_trip() {
        let req = completion_request(
            r#"{"model":"m","messages":[{"role":"user","content":"hi"}]}"#,
        );
        let response = handle_request(req, test_context("\nHello there")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body: ChatCompletionResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.content(), Some("Hello there"));
        assert_eq!(
            body.choices[0].finish_reason.as_deref(),
            Some("stop")
        );
        assert!(body.id.starts_with("chatcmpl-"));
    }

    #[tokio::test]
    async fn test_streaming_emits_chunks_and_done() {
        let req = completion_request(
            r#"{"model":"m","messages":[{"role":"user","content":"hi"}],"stream":true}"#,
        );
        let response = handle_request(req, test_context("\nHello streaming world"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );

        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let mut parser = SseParser::new();
        let events = parser.push(&bytes);
        assert_eq!(events.last(), Some(&SseEvent::Done));

        let mut content = String::new();
        let mut saw_finish = false;
        for event in &events {
            if let SseEvent::Data(data) = event {
                let chunk: ChatCompletionChunk = serde_json::from_str(data).unwrap();
                if let Some(text) = chunk.content() {
                    content.push_str(text);
                }
                if chunk.choices[0].finish_reason.is_some() {
                    saw_finish = true;
                }
            }
        }
        assert_eq!(content, "Hello streaming world");
        assert!(saw_finish);
    }
}
