//! Chat messages, sampling parameters, and token streams.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// One turn of a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// `system`, `user`, or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Build a message from a role and content.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Sampling parameters for one generation request.
///
/// `None` means "use the daemon default"; the façade fills defaults before
/// the request reaches a backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Nucleus sampling cutoff.
    pub top_p: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    pub stop: Vec<String>,
}

impl GenerationParams {
    /// Overlay `self` onto `defaults`: any field set here wins.
    pub fn or_defaults(&self, defaults: &GenerationParams) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            stop: if self.stop.is_empty() {
                defaults.stop.clone()
            } else {
                self.stop.clone()
            },
        }
    }
}

/// One unit of streamed generation output.
///
/// A stream yields zero or more chunks with `done == false`, then exactly
/// one with `done == true` (which may carry empty text), then ends.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenChunk {
    /// Text delta; may be empty on the terminal chunk.
    pub text: String,
    /// Whether generation has finished.
    pub done: bool,
}

impl TokenChunk {
    /// A text delta.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
        }
    }

    /// The terminal chunk.
    pub fn done() -> Self {
        Self {
            text: String::new(),
            done: true,
        }
    }
}

/// A lazy, finite sequence of [`TokenChunk`]s from one generation.
///
/// Dropping the stream cancels the upstream request; this is the
/// cancellation path for client disconnects.
pub struct TokenStream {
    /// The boxed event stream.
    pub receiver: Pin<Box<dyn Stream<Item = Result<TokenChunk, BackendError>> + Send>>,
}

impl TokenStream {
    /// Wrap a stream of chunk results.
    pub fn new(
        stream: impl Stream<Item = Result<TokenChunk, BackendError>> + Send + 'static,
    ) -> Self {
        Self {
            receiver: Box::pin(stream),
        }
    }
}

impl Stream for TokenStream {
    type Item = Result<TokenChunk, BackendError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for TokenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn or_defaults_prefers_request_values() {
        let defaults = GenerationParams {
            temperature: Some(0.8),
            top_p: Some(0.9),
            max_tokens: Some(2048),
            stop: vec!["</s>".into()],
        };
        let request = GenerationParams {
            temperature: Some(0.2),
            ..Default::default()
        };
        let merged = request.or_defaults(&defaults);
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.top_p, Some(0.9));
        assert_eq!(merged.max_tokens, Some(2048));
        assert_eq!(merged.stop, vec!["</s>".to_string()]);
    }

    #[test]
    fn or_defaults_request_stops_win() {
        let defaults = GenerationParams {
            stop: vec!["</s>".into()],
            ..Default::default()
        };
        let request = GenerationParams {
            stop: vec!["END".into()],
            ..Default::default()
        };
        assert_eq!(request.or_defaults(&defaults).stop, vec!["END".to_string()]);
    }

    #[test]
    fn chunk_constructors() {
        assert!(!TokenChunk::text("hi").done);
        assert!(TokenChunk::done().done);
        assert!(TokenChunk::done().text.is_empty());
    }

    #[tokio::test]
    async fn token_stream_delegates_polling() {
        let chunks = vec![Ok(TokenChunk::text("a")), Ok(TokenChunk::done())];
        let mut stream = TokenStream::new(futures::stream::iter(chunks));
        assert_eq!(stream.next().await.unwrap().unwrap().text, "a");
        assert!(stream.next().await.unwrap().unwrap().done);
        assert!(stream.next().await.is_none());
    }
}
