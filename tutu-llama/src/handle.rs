//! The live handle over one supervised `llama-server` child.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Child;
use tokio::sync::Mutex;

use tutu_types::{
    BackendError, ChatMessage, GenerationParams, ModelBackend, TokenStream,
};

use crate::ndjson;
use crate::ring::StderrRing;
use crate::sse;

/// Grace period for the child's `/shutdown` endpoint before a hard kill.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Cap on waiting for the killed child to be reaped.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Total per-request deadline on the child client. Generations are slow;
/// this only bounds a wedged child.
const REQUEST_DEADLINE: Duration = Duration::from_secs(600);

/// Owns one `llama-server` child and its loopback endpoint.
///
/// All inference goes through the child's private HTTP API. The handle is
/// destroyed exactly once via [`ModelBackend::close`], which terminates the
/// child even if the graceful shutdown request is ignored.
pub struct LlamaServerHandle {
    base_url: String,
    model_path: PathBuf,
    mem_bytes: u64,
    http: reqwest::Client,
    child: Mutex<Option<Child>>,
    stderr: StderrRing,
    closed: AtomicBool,
}

impl LlamaServerHandle {
    /// Wrap a ready child.
    pub fn new(child: Child, port: u16, model_path: PathBuf, mem_bytes: u64, stderr: StderrRing) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(REQUEST_DEADLINE)
            .build()
            .unwrap_or_default();
        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            model_path,
            mem_bytes,
            http,
            child: Mutex::new(Some(child)),
            stderr,
            closed: AtomicBool::new(false),
        }
    }

    /// The child's endpoint, e.g. `http://127.0.0.1:43117`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Path of the weights file the child was started with.
    pub fn model_path(&self) -> &std::path::Path {
        &self.model_path
    }

    /// Tail of the child's captured stderr.
    pub fn stderr_tail(&self) -> String {
        self.stderr.tail_lines(10)
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BackendError::Closed)
        } else {
            Ok(())
        }
    }

    async fn post_stream(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, BackendError> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(url = %url, "proxying streaming request to backend");
        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::Transport(format!(
                "backend returned {status}: {text}"
            )));
        }
        Ok(response)
    }
}

/// Map a transport failure, distinguishing timeouts.
fn map_reqwest_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Transport(err.to_string())
    }
}

fn sampling_fields(body: &mut serde_json::Value, params: &GenerationParams) {
    if let Some(t) = params.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = params.top_p {
        body["top_p"] = json!(p);
    }
    if !params.stop.is_empty() {
        body["stop"] = json!(params.stop);
    }
}

#[async_trait]
impl ModelBackend for LlamaServerHandle {
    /// Forward the chat form to the child's OpenAI-compatible endpoint and
    /// stream the SSE response back as token chunks.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<TokenStream, BackendError> {
        self.ensure_open()?;
        let mut body = json!({
            "messages": messages,
            "stream": true,
        });
        if let Some(n) = params.max_tokens {
            body["max_tokens"] = json!(n);
        }
        sampling_fields(&mut body, params);

        let response = self.post_stream("/v1/chat/completions", body).await?;
        Ok(sse::stream_chat(response))
    }

    /// Raw-prompt completion through the child's native `/completion`
    /// endpoint (NDJSON stream).
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, BackendError> {
        self.ensure_open()?;
        let mut body = json!({
            "prompt": prompt,
            "stream": true,
        });
        if let Some(n) = params.max_tokens {
            body["n_predict"] = json!(n);
        }
        sampling_fields(&mut body, params);

        let response = self.post_stream("/completion", body).await?;
        Ok(ndjson::stream_completion(response))
    }

    /// One `/embedding` request per input, concatenated in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        self.ensure_open()?;
        let url = format!("{}/embedding", self.base_url);
        let mut out = Vec::with_capacity(inputs.len());
        for input in inputs {
            let response = self
                .http
                .post(&url)
                .header("content-type", "application/json")
                .json(&json!({ "content": input }))
                .send()
                .await
                .map_err(map_reqwest_error)?;
            let status = response.status();
            let text = response.text().await.map_err(map_reqwest_error)?;
            if !status.is_success() {
                return Err(BackendError::Transport(format!(
                    "backend returned {status}: {text}"
                )));
            }
            let json: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| BackendError::Protocol(format!("invalid embedding response: {e}")))?;
            out.push(parse_embedding(&json)?);
        }
        Ok(out)
    }

    fn memory_bytes(&self) -> u64 {
        self.mem_bytes
    }

    /// Ask the child to shut down, then make sure of it.
    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };

        let shutdown = self
            .http
            .post(format!("{}/shutdown", self.base_url))
            .timeout(SHUTDOWN_GRACE)
            .send();
        if let Err(e) = shutdown.await {
            tracing::debug!(error = %e, "graceful shutdown request failed, killing child");
        }

        if let Err(e) = child.start_kill() {
            tracing::debug!(error = %e, "kill failed (child already gone?)");
        }
        match tokio::time::timeout(KILL_WAIT, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "llama-server exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "waiting on llama-server failed"),
            Err(_) => tracing::warn!("llama-server did not exit within the kill window"),
        }
    }
}

/// Pull the vector out of an `/embedding` response. The shape differs
/// slightly across server builds: either a top-level `embedding` array or
/// a one-element array wrapping it.
fn parse_embedding(json: &serde_json::Value) -> Result<Vec<f32>, BackendError> {
    let raw = if json["embedding"].is_array() {
        &json["embedding"]
    } else if json[0]["embedding"].is_array() {
        &json[0]["embedding"]
    } else {
        return Err(BackendError::Protocol(
            "embedding response missing 'embedding' array".into(),
        ));
    };
    // Pooled embeddings may come nested one level deeper.
    let raw = if raw[0].is_array() { &raw[0] } else { raw };
    raw.as_array()
        .expect("checked is_array above")
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                BackendError::Protocol("non-numeric value in embedding".into())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Handle pointed at a mock server instead of a real child. `close`
    /// takes the no-child path, which keeps these tests process-free.
    fn detached_handle(base_url: &str) -> LlamaServerHandle {
        LlamaServerHandle {
            base_url: base_url.trim_end_matches('/').to_string(),
            model_path: PathBuf::from("/fake/model.gguf"),
            mem_bytes: 42,
            http: reqwest::Client::new(),
            child: Mutex::new(None),
            stderr: StderrRing::new(),
            closed: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn chat_parses_sse_stream() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_raw(body, "text/event-stream"),
            )
            .mount(&server)
            .await;

        let handle = detached_handle(&server.uri());
        let messages = [ChatMessage::new("user", "hi")];
        let mut stream = handle
            .chat(&messages, &GenerationParams::default())
            .await
            .unwrap();

        let mut text = String::new();
        let mut done_count = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            if chunk.done {
                done_count += 1;
            } else {
                text.push_str(&chunk.text);
            }
        }
        assert_eq!(text, "Hello");
        assert_eq!(done_count, 1, "exactly one terminal chunk");
    }

    #[tokio::test]
    async fn generate_parses_ndjson_stream() {
        let server = MockServer::start().await;
        let body = "{\"content\":\"a\",\"stop\":false}\n{\"content\":\"b\",\"stop\":true}\n";
        Mock::given(method("POST"))
            .and(path("/completion"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"),
            )
            .mount(&server)
            .await;

        let handle = detached_handle(&server.uri());
        let mut stream = handle
            .generate("prompt", &GenerationParams::default())
            .await
            .unwrap();

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            if chunk.done {
                break;
            }
            text.push_str(&chunk.text);
        }
        assert_eq!(text, "ab");
    }

    #[tokio::test]
    async fn embed_concatenates_per_input_responses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embedding"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embedding": [0.25, -0.5, 1.0]
            })))
            .mount(&server)
            .await;

        let handle = detached_handle(&server.uri());
        let out = handle
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], vec![0.25, -0.5, 1.0]);
    }

    #[tokio::test]
    async fn backend_error_status_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("load error"))
            .mount(&server)
            .await;

        let handle = detached_handle(&server.uri());
        let err = handle
            .chat(&[], &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)), "got: {err}");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_requests() {
        let server = MockServer::start().await;
        // No /shutdown mock: the graceful request 404s, which close ignores.
        let handle = detached_handle(&server.uri());

        handle.close().await;
        handle.close().await;

        let err = handle
            .chat(&[], &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Closed));
        assert_eq!(handle.memory_bytes(), 42);
    }

    #[test]
    fn parse_embedding_handles_both_shapes() {
        let flat = serde_json::json!({ "embedding": [1.0, 2.0] });
        assert_eq!(parse_embedding(&flat).unwrap(), vec![1.0, 2.0]);

        let wrapped = serde_json::json!([{ "embedding": [[3.0, 4.0]] }]);
        assert_eq!(parse_embedding(&wrapped).unwrap(), vec![3.0, 4.0]);

        let bad = serde_json::json!({ "nope": true });
        assert!(parse_embedding(&bad).is_err());
    }
}
