//! The Ollama-compatible `/api/*` surface. Streaming is NDJSON: one JSON
//! object per line, terminated by a `done: true` object.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;

use tutu_types::{ChatMessage, GenerationParams, ModelBackend, PullProgress};

use crate::chat::collect_stream;
use crate::error::ApiError;
use crate::state::ServerState;

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Serialise one NDJSON line.
fn line(value: &Value) -> Bytes {
    let mut text = value.to_string();
    text.push('\n');
    Bytes::from(text)
}

/// Wrap a line stream into an `application/x-ndjson` response.
fn ndjson_response(
    stream: impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
) -> Response {
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(stream),
    )
        .into_response()
}

/// `POST /api/chat` request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Model reference. Required.
    pub model: Option<String>,
    /// Conversation so far. Required, non-empty.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Stream the response. Ollama clients default to streaming.
    pub stream: Option<bool>,
    /// Generation options (`temperature`, `top_p`, `num_predict`, `stop`).
    #[serde(default)]
    pub options: GenerationOptions,
}

/// `POST /api/generate` request body.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Model reference. Required.
    pub model: Option<String>,
    /// Raw prompt.
    #[serde(default)]
    pub prompt: String,
    /// Stream the response. Defaults to true.
    pub stream: Option<bool>,
    /// Generation options.
    #[serde(default)]
    pub options: GenerationOptions,
}

/// Ollama's `options` object, reduced to the knobs the backend takes.
#[derive(Debug, Default, Deserialize)]
pub struct GenerationOptions {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,
    /// Output token cap.
    pub num_predict: Option<u32>,
    /// Stop sequences.
    #[serde(default)]
    pub stop: Vec<String>,
}

impl GenerationOptions {
    fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.num_predict,
            stop: self.stop.clone(),
        }
    }
}

/// `POST /api/chat`.
pub async fn chat(
    State(state): State<ServerState>,
    Json(request): Json<ChatRequest>,
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
    let params = request.options.params().or_defaults(&state.defaults);
    let stream = handle.chat(&request.messages, &params).await?;

    if request.stream.unwrap_or(true) {
        let ndjson = token_lines(handle, stream, model, |model, delta, done| {
            json!({
                "model": model,
                "created_at": now_rfc3339(),
                "message": { "role": "assistant", "content": delta },
                "done": done,
            })
        });
        return Ok(ndjson_response(ndjson));
    }

    let (content, _tokens) = collect_stream(stream).await;
    drop(handle);
    Ok(Json(json!({
        "model": model,
        "created_at": now_rfc3339(),
        "message": { "role": "assistant", "content": content },
        "done": true,
    }))
    .into_response())
}

/// `POST /api/generate`.
pub async fn generate(
    State(state): State<ServerState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Response, ApiError> {
    let Some(model) = request.model.clone().filter(|m| !m.is_empty()) else {
        return Err(ApiError::bad_request("model is required"));
    };

    let handle = state
        .pool
        .acquire(&model)
        .await
        .map_err(|e| ApiError::model_error(&e))?;
    let params = request.options.params().or_defaults(&state.defaults);
    let stream = handle.generate(&request.prompt, &params).await?;

    if request.stream.unwrap_or(true) {
        let ndjson = token_lines(handle, stream, model, |model, delta, done| {
            json!({
                "model": model,
                "created_at": now_rfc3339(),
                "response": delta,
                "done": done,
            })
        });
        return Ok(ndjson_response(ndjson));
    }

    let (content, _tokens) = collect_stream(stream).await;
    drop(handle);
    Ok(Json(json!({
        "model": model,
        "created_at": now_rfc3339(),
        "response": content,
        "done": true,
    }))
    .into_response())
}

/// Turn a token stream into NDJSON lines via an envelope builder.
///
/// The pool handle moves into the stream so client disconnect releases it.
/// Exactly one `done: true` line terminates the stream.
fn token_lines(
    handle: tutu_pool::PoolHandle,
    mut stream: tutu_types::TokenStream,
    model: String,
    envelope: impl Fn(&str, &str, bool) -> Value + Send + 'static,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let _handle = handle;

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) if chunk.done => break,
                Ok(chunk) => {
                    yield Ok(line(&envelope(&model, &chunk.text, false)));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "token stream failed mid-generation");
                    break;
                }
            }
        }
        yield Ok(line(&envelope(&model, "", true)));
    }
}

/// Body accepted by `show`, `pull`, and `delete`: Ollama clients send
/// either `name` or `model`.
#[derive(Debug, Deserialize)]
pub struct NamedModel {
    /// The model reference.
    #[serde(alias = "name")]
    pub model: String,
    /// Stream progress (pull only). Defaults to true.
    pub stream: Option<bool>,
}

/// `GET /api/tags`.
pub async fn tags(State(state): State<ServerState>) -> Result<Json<Value>, ApiError> {
    let records = state
        .registry
        .list()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let models: Vec<Value> = records
        .iter()
        .map(|r| {
            json!({
                "name": r.name,
                "modified_at": r.pulled_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                "size": r.size,
                "digest": r.digest,
            })
        })
        .collect();
    Ok(Json(json!({ "models": models })))
}

/// `POST /api/show`.
pub async fn show(
    State(state): State<ServerState>,
    Json(request): Json<NamedModel>,
) -> Result<Json<Value>, ApiError> {
    let record = state.registry.show(&request.model).await?;
    Ok(Json(json!({
        "name": record.name,
        "digest": record.digest,
        "size": record.size,
        "modified_at": record.pulled_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        "details": {
            "format": record.format,
            "family": record.family,
            "parameter_size": record.parameter_size,
            "quantization_level": record.quantization,
        },
    })))
}

/// `DELETE /api/delete`.
pub async fn delete_model(
    State(state): State<ServerState>,
    Json(request): Json<NamedModel>,
) -> Result<Json<Value>, ApiError> {
    state.registry.remove(&request.model).await?;
    Ok(Json(json!({ "status": "deleted" })))
}

/// `GET /api/ps`.
pub async fn ps(State(state): State<ServerState>) -> Json<Value> {
    let models: Vec<Value> = state
        .pool
        .loaded_models()
        .await
        .iter()
        .map(|m| {
            json!({
                "name": m.name,
                "size": m.size,
                "processor": m.processor,
                "expires_at": m.expires_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            })
        })
        .collect();
    Json(json!({ "models": models }))
}

/// `POST /api/pull`.
///
/// Streaming (the default) emits NDJSON progress lines and a terminal
/// `{"status":"success"}`. With `stream: false` the pull runs to
/// completion and failures surface through the error envelope.
pub async fn pull(
    State(state): State<ServerState>,
    Json(request): Json<NamedModel>,
) -> Result<Response, ApiError> {
    let name = request.model.clone();

    if !request.stream.unwrap_or(true) {
        state
            .registry
            .pull(&name, None)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        return Ok(Json(json!({ "status": "success" })).into_response());
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(String, f64)>();
    let progress: PullProgress = Arc::new(move |status: &str, percent: f64| {
        let _ = tx.send((status.to_string(), percent));
    });

    let registry = state.registry.clone();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let result = registry.pull(&name, Some(progress)).await;
        let _ = done_tx.send(result);
    });

    let ndjson = async_stream::stream! {
        while let Some((status, percent)) = rx.recv().await {
            yield Ok::<_, Infallible>(line(&json!({
                "status": status,
                "percent": percent,
            })));
        }
        match done_rx.await {
            Ok(Ok(())) => yield Ok(line(&json!({ "status": "success" }))),
            Ok(Err(e)) => yield Ok(line(&json!({ "error": e.to_string() }))),
            Err(_) => yield Ok(line(&json!({ "error": "pull task failed" }))),
        }
    };
    Ok(ndjson_response(ndjson))
}
