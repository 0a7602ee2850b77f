//! Shared SSE streaming infrastructure for the adapter clients.
//!
//! The STT and LLM upstreams both speak server-sent events: buffer chunks,
//! split on `\n\n`, extract `data:` payloads, and hand each payload to an
//! adapter-specific parser. This module extracts that shared loop:
//! - [`drain_data_lines`] -- pull complete `data:` payloads from a buffer
//! - [`sse_response_stream`] -- build a `BoxStream` from a response + parser

use vx_domain::error::{Error, Result};
use vx_domain::stream::BoxStream;

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Events are delimited by `\n\n`; an event block may carry `event:`,
/// `id:`, or `retry:` lines, which are ignored. The buffer is drained
/// in place; a trailing partial event stays for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a [`BoxStream`] from an SSE `reqwest::Response` and a parser
/// closure. The closure receives each `data:` payload and returns zero or
/// more items; `map_err` converts transport failures to the owning
/// adapter's error kind.
///
/// Dropping the returned stream drops the response, which aborts the
/// request and frees the connection.
pub(crate) fn sse_response_stream<T, F, E>(
    response: reqwest::Response,
    mut parse_data: F,
    map_err: E,
) -> BoxStream<'static, Result<T>>
where
    T: Send + 'static,
    F: FnMut(&str) -> Vec<Result<T>> + Send + 'static,
    E: Fn(reqwest::Error) -> Error + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        for item in parse_data(&data) {
                            yield item;
                        }
                    }
                }
                Ok(None) => {
                    // Body closed, flush a trailing partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            for item in parse_data(&data) {
                                yield item;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(map_err(e));
                    break;
                }
            }
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_single_complete_event() {
        let mut buf = String::from("event: chunk\ndata: {\"text\":\"hi\"}\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"text\":\"hi\"}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_multiple_events() {
        let mut buf = String::from("data: first\n\ndata: second\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["first", "second"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_partial_event_stays_in_buffer() {
        let mut buf = String::from("data: complete\n\ndata: partial");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["complete"]);
        assert_eq!(buf, "data: partial");
    }

    #[test]
    fn drain_ignores_non_data_lines() {
        let mut buf = String::from("event: ping\nid: 7\nretry: 5000\ndata: payload\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["payload"]);
    }

    #[test]
    fn drain_skips_empty_data_lines() {
        let mut buf = String::from("data: \n\n");
        assert!(drain_data_lines(&mut buf).is_empty());
    }

    #[test]
    fn drain_incremental_buffering() {
        let mut buf = String::from("data: chunk1");
        assert!(drain_data_lines(&mut buf).is_empty());

        buf.push_str("\n\ndata: chunk2\n\n");
        let lines = drain_data_lines(&mut buf);
        assert_eq!(lines, vec!["chunk1", "chunk2"]);
        assert!(buf.is_empty());
    }
}
