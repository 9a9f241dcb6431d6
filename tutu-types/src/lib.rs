//! # tutu-types: Core vocabulary for the TuTu inference daemon
//!
//! This crate defines the shared types and the capability traits that the
//! rest of the workspace composes:
//!
//! | Seam | Trait | Implemented by |
//! |------|-------|----------------|
//! | Inference | [`ModelBackend`] | `tutu-llama` handle, [`test_utils::MockBackend`] |
//! | Name → path | [`ModelResolver`] | `tutu-registry` |
//! | Path → backend | [`BackendLoader`] | `tutu-llama` loader |
//! | Metadata persistence | [`MetadataStore`] | `tutu-store` |
//!
//! Every trait is operation-defined and object-safe: the engine pool holds
//! `Arc<dyn ModelBackend>` without caring whether the other side is a
//! supervised `llama-server` child process or an in-process mock.
//!
//! ## Dependency Notes
//!
//! Wire payloads use `serde_json::Value` only at the extension edges;
//! everything the daemon reasons about is a typed struct in this crate.

#![deny(missing_docs)]

pub mod backend;
pub mod error;
pub mod generation;
pub mod manifest;
pub mod model;
pub mod store;

#[cfg(feature = "test-utils")]
pub mod test_utils;

// Re-exports for convenience
pub use backend::{BackendLoader, ModelBackend, ModelResolver};
pub use error::{BackendError, PoolError, RegistryError, StoreError};
pub use generation::{ChatMessage, GenerationParams, TokenChunk, TokenStream};
pub use manifest::{Layer, Manifest, MANIFEST_SCHEMA_VERSION, WEIGHTS_MEDIA_TYPE};
pub use model::{Digest, ModelMetadata, ModelRef, PullProgress};
pub use store::MetadataStore;
