//! NDJSON parsing for the child's `/completion` stream.
//!
//! Raw-prompt completions stream one JSON object per line:
//!
//! ```text
//! {"content":"Hel","stop":false}
//! {"content":"lo","stop":true}
//! ```
//!
//! `stop: true` terminates the stream; a final content fragment on the
//! stop line is emitted before the terminal chunk.

use futures::StreamExt;
use reqwest::Response;

use tutu_types::{BackendError, TokenChunk, TokenStream};

/// Wrap an NDJSON completion response body into a [`TokenStream`].
pub(crate) fn stream_completion(response: Response) -> TokenStream {
    let byte_stream = response.bytes_stream();
    TokenStream::new(async_stream::stream! {
        let mut bytes_stream = std::pin::pin!(byte_stream);
        let mut line_buf = String::new();

        while let Some(chunk_result) = bytes_stream.next().await {
            let chunk = match chunk_result {
                Ok(b) => b,
                Err(e) => {
                    yield Err(BackendError::Transport(format!("stream read error: {e}")));
                    return;
                }
            };

            let chunk_str = match std::str::from_utf8(&chunk) {
                Ok(s) => s,
                Err(e) => {
                    yield Err(BackendError::Protocol(format!("UTF-8 decode error: {e}")));
                    return;
                }
            };

            line_buf.push_str(chunk_str);

            while let Some(newline_pos) = line_buf.find('\n') {
                let line = line_buf[..newline_pos].trim_end_matches('\r').to_string();
                line_buf.drain(..=newline_pos);

                if line.trim().is_empty() {
                    continue;
                }
                // Some builds prefix NDJSON lines SSE-style.
                let payload = line.strip_prefix("data: ").unwrap_or(&line);

                match parse_completion_line(payload) {
                    Ok(events) => {
                        for event in events {
                            let done = event.done;
                            yield Ok(event);
                            if done {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        yield Ok(TokenChunk::done());
    })
}

/// Parse one `{content, stop}` line.
fn parse_completion_line(line: &str) -> Result<Vec<TokenChunk>, BackendError> {
    let json: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| BackendError::Protocol(format!("JSON parse error in NDJSON: {e}")))?;

    let mut chunks = Vec::new();
    if let Some(content) = json["content"].as_str() {
        if !content.is_empty() {
            chunks.push(TokenChunk::text(content));
        }
    }
    if json["stop"].as_bool().unwrap_or(false) {
        chunks.push(TokenChunk::done());
    }
    Ok(chunks)
}
