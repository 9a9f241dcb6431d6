//! SSE parsing for the child's OpenAI-style chat stream.
//!
//! `llama-server` streams chat completions as Server-Sent Events, one
//! `data:` line per chunk:
//!
//! ```text
//! data: {"choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}
//!
//! data: {"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}
//!
//! data: [DONE]
//! ```
//!
//! The parser maps each content delta to a [`TokenChunk`] and terminates
//! after exactly one `done` chunk: on `[DONE]`, on a non-null
//! `finish_reason`, or on clean end of stream, whichever comes first.

use futures::StreamExt;
use reqwest::Response;

use tutu_types::{BackendError, TokenChunk, TokenStream};

/// Wrap an SSE chat response body into a [`TokenStream`].
pub(crate) fn stream_chat(response: Response) -> TokenStream {
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

            // Append chunk to the line buffer and process complete lines
            line_buf.push_str(chunk_str);

            while let Some(newline_pos) = line_buf.find('\n') {
                let line = line_buf[..newline_pos].trim_end_matches('\r').to_string();
                line_buf.drain(..=newline_pos);

                match parse_sse_line(&line) {
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

        // Upstream closed without a terminal marker; end the stream anyway.
        yield Ok(TokenChunk::done());
    })
}

/// Parse one SSE line into zero or more chunks.
fn parse_sse_line(line: &str) -> Result<Vec<TokenChunk>, BackendError> {
    let Some(data) = line.strip_prefix("data: ").map(str::trim) else {
        // Blank separators, comments, and `event:` prefixes carry nothing.
        return Ok(vec![]);
    };

    if data == "[DONE]" {
        return Ok(vec![TokenChunk::done()]);
    }

    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| BackendError::Protocol(format!("JSON parse error in SSE: {e}")))?;

    let choice = &json["choices"][0];
    let mut chunks = Vec::new();
    if let Some(content) = choice["delta"]["content"].as_str() {
        if !content.is_empty() {
            chunks.push(TokenChunk::text(content));
        }
    }
    if !choice["finish_reason"].is_null() {
        chunks.push(TokenChunk::done());
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_line_yields_text_chunk() {
        let chunks = parse_sse_line(
            r#"data: {"choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunks, vec![TokenChunk::text("Hi")]);
    }

    #[test]
    fn finish_reason_yields_done() {
        let chunks = parse_sse_line(
            r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(chunks, vec![TokenChunk::done()]);
    }

    #[test]
    fn content_and_finish_in_one_event() {
        let chunks = parse_sse_line(
            r#"data: {"choices":[{"index":0,"delta":{"content":"bye"},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(chunks, vec![TokenChunk::text("bye"), TokenChunk::done()]);
    }

    #[test]
    fn done_sentinel_yields_done() {
        assert_eq!(
            parse_sse_line("data: [DONE]").unwrap(),
            vec![TokenChunk::done()]
        );
    }

    #[test]
    fn blank_and_comment_lines_yield_nothing() {
        assert!(parse_sse_line("").unwrap().is_empty());
        assert!(parse_sse_line(": keep-alive").unwrap().is_empty());
        assert!(parse_sse_line("event: message").unwrap().is_empty());
    }

    #[test]
    fn empty_content_yields_nothing() {
        let chunks = parse_sse_line(
            r#"data: {"choices":[{"index":0,"delta":{"content":""},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn malformed_json_is_a_protocol_error() {
        let err = parse_sse_line("data: {not json").unwrap_err();
        assert!(matches!(err, BackendError::Protocol(_)));
    }
}
