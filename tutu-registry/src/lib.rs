#![deny(missing_docs)]
//! Model registry: resolves human model references to local weights,
//! orchestrates resumable downloads into the blob store, and keeps the
//! manifest and metadata records consistent.
//!
//! The pull path publishes blobs before manifests, so no reader can ever
//! observe a manifest that references a missing blob.

pub mod catalog;
pub mod pull;
pub mod registry;
pub mod tutufile;

pub use catalog::{Catalog, CatalogEntry};
pub use registry::Registry;
