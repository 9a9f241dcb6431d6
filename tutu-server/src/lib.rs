#![deny(missing_docs)]
//! The HTTP façade: two compatible API surfaces over one engine pool and
//! one model registry.
//!
//! - OpenAI-style `/v1/*`: SSE streaming (`text/event-stream`), `[DONE]`
//!   sentinel, OpenAI envelope shapes.
//! - Ollama-style `/api/*`: NDJSON streaming (`application/x-ndjson`),
//!   terminal `done: true` object.
//!
//! Both chat surfaces share the pool-acquisition contract: the handle is a
//! scoped guard moved into the response stream, so a client disconnect
//! drops the stream, aborts the upstream request, and releases the pool
//! reference exactly once.

pub mod chat;
pub mod error;
pub mod ollama;
pub mod openai;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::ServerState;
