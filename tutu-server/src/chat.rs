//! Shared plumbing for chat-shaped handlers: completion ids, token
//! accounting, and the collection of a full stream into one string.

use futures::StreamExt;
use uuid::Uuid;

use tutu_types::{ChatMessage, TokenStream};

/// Mint a short OpenAI-style completion id.
pub fn completion_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}", &uuid[..8])
}

/// Approximate prompt token count: characters over four. Good enough for
/// the usage block; exact counts would need the backend's tokenizer.
pub fn approx_prompt_tokens(messages: &[ChatMessage]) -> u32 {
    let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    (chars / 4) as u32
}

/// Drain a token stream into `(content, completion_tokens)`.
///
/// Transport errors mid-stream end collection with whatever arrived. The
/// caller keeps its pool handle in scope until this returns.
pub async fn collect_stream(mut stream: TokenStream) -> (String, u32) {
    let mut content = String::new();
    let mut tokens = 0u32;
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) if chunk.done => break,
            Ok(chunk) => {
                tokens += 1;
                content.push_str(&chunk.text);
            }
            Err(e) => {
                tracing::warn!(error = %e, "token stream failed mid-generation");
                break;
            }
        }
    }
    (content, tokens)
}
