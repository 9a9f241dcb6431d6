#![deny(missing_docs)]
//! Filesystem persistence for the TuTu daemon.
//!
//! Everything lives under one root directory (the daemon "home"):
//!
//! ```text
//! <home>/
//!   blobs/sha256-<hex>          immutable content-addressed weights
//!   blobs/.download-<name>.tmp  resumable partial downloads
//!   manifests/<name>/<tag>      small JSON, schema version 2
//!   registry/<name>.json        one metadata record per model
//!   bin/                        acquired inference binary + companions
//!   keys/                       node identity (written by the daemon)
//! ```
//!
//! Blobs are never rewritten in place: writes stream to a temp file and
//! publish with a rename, so a reader either sees a complete blob or none.

pub mod blob;
pub mod layout;
pub mod manifest;
pub mod metadata;

pub use blob::BlobStore;
pub use layout::StoreLayout;
pub use manifest::ManifestStore;
pub use metadata::FsMetadataStore;
