//! Mock implementations for pool and façade tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::backend::{BackendLoader, ModelBackend, ModelResolver};
use crate::error::{BackendError, RegistryError};
use crate::generation::{ChatMessage, GenerationParams, TokenChunk, TokenStream};

/// Fixed memory footprint reported by [`MockBackend`].
pub const MOCK_MEMORY_BYTES: u64 = 1 << 20;

/// In-process [`ModelBackend`] that replays a fixed token script.
///
/// Chat and generate yield each scripted token as a delta followed by one
/// terminal chunk; embeddings return a small deterministic vector per input.
pub struct MockBackend {
    tokens: Vec<String>,
    closed: AtomicBool,
    chat_calls: AtomicUsize,
}

impl MockBackend {
    /// A backend that emits the given tokens.
    pub fn new(tokens: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            closed: AtomicBool::new(false),
            chat_calls: AtomicUsize::new(0),
        }
    }

    /// Whether [`ModelBackend::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// How many chat streams have been opened.
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    fn scripted_stream(&self) -> TokenStream {
        let chunks: Vec<_> = self
            .tokens
            .iter()
            .map(|t| Ok(TokenChunk::text(t.clone())))
            .chain(std::iter::once(Ok(TokenChunk::done())))
            .collect();
        TokenStream::new(futures::stream::iter(chunks))
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(["Hello! ", "I ", "received ", "your ", "prompt."])
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<TokenStream, BackendError> {
        if self.is_closed() {
            return Err(BackendError::Closed);
        }
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scripted_stream())
    }

    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<TokenStream, BackendError> {
        if self.is_closed() {
            return Err(BackendError::Closed);
        }
        Ok(self.scripted_stream())
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if self.is_closed() {
            return Err(BackendError::Closed);
        }
        Ok(inputs
            .iter()
            .map(|s| vec![s.len() as f32, 0.5, -0.5, 1.0])
            .collect())
    }

    fn memory_bytes(&self) -> u64 {
        MOCK_MEMORY_BYTES
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Resolver that maps every name to `/fake/<name>` without touching disk.
pub struct FakeResolver;

#[async_trait]
impl ModelResolver for FakeResolver {
    async fn resolve(&self, name: &str) -> Result<PathBuf, RegistryError> {
        Ok(PathBuf::from(format!("/fake/{name}")))
    }
}

/// Loader that produces a fresh [`MockBackend`] per load and counts loads.
pub struct MockLoader {
    loads: AtomicUsize,
}

impl MockLoader {
    /// New loader with a zeroed load counter.
    pub fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
        }
    }

    /// How many loads have been performed.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl Default for MockLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendLoader for MockLoader {
    async fn load(
        &self,
        _name: &str,
        _path: &Path,
    ) -> Result<Arc<dyn ModelBackend>, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockBackend::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn mock_backend_streams_script_then_done() {
        let backend = MockBackend::new(["a", "b"]);
        let mut stream = backend.chat(&[], &GenerationParams::default()).await.unwrap();
        let mut texts = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            if chunk.done {
                break;
            }
            texts.push(chunk.text);
        }
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(backend.chat_calls(), 1);
    }

    #[tokio::test]
    async fn closed_backend_refuses_requests() {
        let backend = MockBackend::default();
        backend.close().await;
        assert!(backend.is_closed());
        assert!(matches!(
            backend.chat(&[], &GenerationParams::default()).await,
            Err(BackendError::Closed)
        ));
    }

    #[tokio::test]
    async fn embed_returns_one_vector_per_input() {
        let backend = MockBackend::default();
        let out = backend
            .embed(&["hello".into(), "world!".into()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0][0], 5.0);
        assert_eq!(out[1][0], 6.0);
    }

    #[tokio::test]
    async fn fake_resolver_prefixes_fake() {
        let path = FakeResolver.resolve("m").await.unwrap();
        assert_eq!(path, PathBuf::from("/fake/m"));
    }

    #[tokio::test]
    async fn mock_loader_counts_loads() {
        let loader = MockLoader::new();
        loader.load("m", Path::new("/fake/m")).await.unwrap();
        loader.load("m", Path::new("/fake/m")).await.unwrap();
        assert_eq!(loader.loads(), 2);
    }
}
