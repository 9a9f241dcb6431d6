#![deny(missing_docs)]
//! The engine pool: a bounded-memory, reference-counted, LRU-evicting
//! cache of loaded models.
//!
//! `acquire` serves cache hits without touching the loader; misses
//! resolve, load, and evict under one lock, which deliberately serialises
//! loads (they are rare and expensive relative to inference calls).
//! Handles are scoped guards: dropping one releases its reference count,
//! on every exit path.

pub mod handle;
pub mod pool;

pub use handle::PoolHandle;
pub use pool::{EnginePool, LoadedModelInfo, PoolConfig};
