//! Shared handler state.

use std::sync::Arc;

use tutu_pool::EnginePool;
use tutu_registry::Registry;
use tutu_types::GenerationParams;

/// State shared across handlers. The daemon owns the components; the
/// façade only holds references.
#[derive(Clone)]
pub struct ServerState {
    /// Engine pool serving all inference.
    pub pool: Arc<EnginePool>,
    /// Model registry serving pulls, listings, and deletes.
    pub registry: Arc<Registry>,
    /// Daemon-wide generation defaults, overridden per request.
    pub defaults: GenerationParams,
    /// Daemon version reported by `/api/version`.
    pub version: String,
}

impl ServerState {
    /// Assemble handler state.
    pub fn new(pool: Arc<EnginePool>, registry: Arc<Registry>, defaults: GenerationParams) -> Self {
        Self {
            pool,
            registry,
            defaults,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
