//! Capability traits: inference backends and the seams that produce them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{BackendError, RegistryError};
use crate::generation::{ChatMessage, GenerationParams, TokenStream};

/// A loaded model that can serve inference.
///
/// Two implementations exist: the `tutu-llama` handle, which proxies to a
/// supervised `llama-server` child process, and the in-process mock used by
/// tests. The engine pool owns backends as `Arc<dyn ModelBackend>` and
/// never inspects which variant it holds.
///
/// Streams returned by [`chat`](ModelBackend::chat) and
/// [`generate`](ModelBackend::generate) end after exactly one terminal
/// chunk; dropping a stream cancels the underlying request.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Stream a chat completion for the given messages.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<TokenStream, BackendError>;

    /// Stream a raw-prompt completion.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TokenStream, BackendError>;

    /// Embed each input string, returning one vector per input.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;

    /// Approximate resident memory for this model, used by the pool's
    /// budget accounting.
    fn memory_bytes(&self) -> u64;

    /// Tear down the backend. Idempotent; must terminate any child process
    /// even if a graceful shutdown request is ignored.
    async fn close(&self);
}

impl std::fmt::Debug for dyn ModelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn ModelBackend")
            .field("memory_bytes", &self.memory_bytes())
            .finish()
    }
}

/// Resolves a model reference to the local path of its weights.
///
/// Implemented by the registry; injected into the pool so the pool never
/// depends on storage details.
#[async_trait]
pub trait ModelResolver: Send + Sync {
    /// Resolve `name` (tag optional) to the weights file path, touching the
    /// model's `last_used` timestamp.
    async fn resolve(&self, name: &str) -> Result<PathBuf, RegistryError>;
}

/// Turns a weights file into a live [`ModelBackend`].
///
/// Implemented by the `tutu-llama` supervisor; tests inject mocks.
#[async_trait]
pub trait BackendLoader: Send + Sync {
    /// Load the model at `path`, spawning and supervising whatever the
    /// backend needs. `name` is used for diagnostics only.
    async fn load(&self, name: &str, path: &Path) -> Result<Arc<dyn ModelBackend>, BackendError>;
}
