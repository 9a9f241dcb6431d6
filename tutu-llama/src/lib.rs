#![deny(missing_docs)]
//! Supervision of the native inference backend.
//!
//! The heavy tensor work is delegated to `llama-server`, treated as an
//! opaque dependency with two concerns:
//!
//! 1. **Acquire it**: find the binary next to the daemon home or on
//!    `PATH`, or download the right release archive for this platform and
//!    extract the binary plus its companion libraries.
//! 2. **Supervise it**: one child process per loaded model, bound to a
//!    free loopback port, health-polled until ready, and proxied over HTTP
//!    with streaming translated into [`tutu_types::TokenStream`]s.
//!
//! A [`LlamaServerHandle`] exclusively owns its child process; `close` is
//! the only way to terminate it and is idempotent.

pub mod handle;
pub mod loader;
pub mod locate;
mod ndjson;
pub mod release;
pub mod ring;
pub mod spawn;
mod sse;

pub use handle::LlamaServerHandle;
pub use loader::{LlamaConfig, LlamaLoader};
pub use ring::StderrRing;
