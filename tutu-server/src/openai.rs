//! The OpenAI-compatible `/v1/*` surface.

use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};

use tutu_types::{ChatMessage, GenerationParams, ModelBackend};

use crate::chat::{approx_prompt_tokens, collect_stream, completion_id};
use crate::error::ApiError;
use crate::state::ServerState;

/// `POST /v1/chat/completions` request body.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    /// Model reference. Required.
    pub model: Option<String>,
    /// Conversation so far. Required, non-empty.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature override.
    pub temperature: Option<f32>,
    /// Nucleus sampling override.
    pub top_p: Option<f32>,
    /// Output token cap override.
    pub max_tokens: Option<u32>,
    /// Stream the response as SSE. Defaults to false.
    #[serde(default)]
    pub stream: bool,
    /// Stop sequences.
    #[serde(default)]
    pub stop: Vec<String>,
}

impl ChatCompletionRequest {
    fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            stop: self.stop.clone(),
        }
    }
}

/// `GET /v1/models`.
pub async fn list_models(State(state): State<ServerState>) -> Result<Json<Value>, ApiError> {
    let records = state
        .registry
        .list()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let data: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                "id": r.name,
                "object": "model",
                "created": r.pulled_at.timestamp(),
                "owned_by": "tutu",
            })
        })
        .collect();
    Ok(Json(json!({ "object": "list", "data": data })))
}

/// `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<ServerState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let Some(model) = request.model.clone().filter(|m| !m.is_empty()) else {
        return Err(ApiError::bad_request("model is required"));
    };
    if request.messages.is_empty() {
        return Err(ApiError::bad_request("messages are required"));
    }

    let handle = state
        .pool
        .acquire(&model)
        .await
        .map_err(|e| ApiError::model_error(&e))?;
    let params = request.params().or_defaults(&state.defaults);

    let id = completion_id();
    let created = Utc::now().timestamp();
    let stream = handle.chat(&request.messages, &params).await?;

    if request.stream {
        return Ok(sse_completion(handle, stream, id, model, created).into_response());
    }

    let (content, completion_tokens) = collect_stream(stream).await;
    let prompt_tokens = approx_prompt_tokens(&request.messages);
    let body = json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "usage": {
            "prompt_tokens": prompt_tokens,
            "completion_tokens": completion_tokens,
            "total_tokens": prompt_tokens + completion_tokens,
        },
    });
    drop(handle);
    Ok(Json(body).into_response())
}

/// Build the SSE response for a streaming chat completion.
///
/// The pool handle moves into the stream: a client disconnect drops the
/// stream, which aborts the upstream request and releases the handle.
fn sse_completion(
    handle: tutu_pool::PoolHandle,
    mut stream: tutu_types::TokenStream,
    id: String,
    model: String,
    created: i64,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let sse_stream = async_stream::stream! {
        let _handle = handle;

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) if chunk.done => break,
                Ok(chunk) => {
                    let envelope = json!({
                        "id": id,
                        "object": "chat.completion.chunk",
                        "created": created,
                        "model": model,
                        "choices": [{
                            "index": 0,
                            "delta": { "content": chunk.text },
                            "finish_reason": null,
                        }],
                    });
                    if let Ok(event) = Event::default().json_data(envelope) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "chat stream failed mid-generation");
                    break;
                }
            }
        }

        let finish = json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": created,
            "model": model,
            "choices": [{
                "index": 0,
                "delta": {},
                "finish_reason": "stop",
            }],
        });
        if let Ok(event) = Event::default().json_data(finish) {
            yield Ok(event);
        }
        yield Ok(Event::default().data("[DONE]"));
    };
    Sse::new(sse_stream)
}

/// `POST /v1/embeddings` request body. `input` may be a single string or
/// an array of strings.
#[derive(Debug, Deserialize)]
pub struct EmbeddingsRequest {
    /// Model reference. Required.
    pub model: Option<String>,
    /// Input text(s).
    pub input: EmbeddingInput,
}

/// String-or-array input form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    /// A single input string.
    One(String),
    /// Several input strings.
    Many(Vec<String>),
}

impl EmbeddingInput {
    fn normalize(self) -> Vec<String> {
        match self {
            EmbeddingInput::One(s) => vec![s],
            EmbeddingInput::Many(v) => v,
        }
    }
}

/// `POST /v1/embeddings`.
pub async fn embeddings(
    State(state): State<ServerState>,
    Json(request): Json<EmbeddingsRequest>,
) -> Result<Json<Value>, ApiError> {
    let Some(model) = request.model.clone().filter(|m| !m.is_empty()) else {
        return Err(ApiError::bad_request("model is required"));
    };
    let inputs = request.input.normalize();
    if inputs.is_empty() {
        return Err(ApiError::bad_request("input is required"));
    }

    let handle = state
        .pool
        .acquire(&model)
        .await
        .map_err(|e| ApiError::model_error(&e))?;
    let vectors = handle.embed(&inputs).await?;
    drop(handle);

    let data: Vec<Value> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| json!({ "object": "embedding", "embedding": v, "index": i }))
        .collect();
    Ok(Json(json!({
        "object": "list",
        "data": data,
        "model": model,
        "usage": {
            "prompt_tokens": inputs.len(),
            "total_tokens": inputs.len(),
        },
    })))
}
