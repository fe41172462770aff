//! Server-Sent Events line parser for streaming completion responses.
//!
//! Buffers chunked bytes, splits on newlines, and yields the payload of each
//! `data:` line. Comments (`:`) and blank lines are skipped. A `[DONE]`
//! payload ends the stream.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use streamer_server::relay::RelayError;

const DONE: &str = "[DONE]";

/// What one SSE line carries.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Data(String),
    Done,
    Skip,
}

/// Parse `data:` payloads out of a byte stream.
///
/// A transport error is yielded once and then the stream ends.
pub fn sse_data_lines<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, RelayError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures::stream::unfold(
        (byte_stream, BytesMut::with_capacity(8192), false),
        |(mut stream, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line_bytes = buffer.split_to(newline_pos + 1);
                    line_bytes.truncate(line_bytes.len() - 1);
                    let Ok(line) = std::str::from_utf8(&line_bytes) else {
                        continue;
                    };
                    match classify_line(line) {
                        Line::Data(data) => return Some((Ok(data), (stream, buffer, false))),
                        Line::Done => return None,
                        Line::Skip => continue,
                    }
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        let error = RelayError::Backend(format!("stream read failed: {e}"));
                        return Some((Err(error), (stream, buffer, true)));
                    }
                    None => {
                        // Trailing line without a newline.
                        let line = std::str::from_utf8(&buffer).ok()?;
                        if let Line::Data(data) = classify_line(line) {
                            buffer.clear();
                            return Some((Ok(data), (stream, buffer, true)));
                        }
                        return None;
                    }
                }
            }
        },
    )
}

fn classify_line(line: &str) -> Line {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Line::Skip;
    }
    let Some(data) = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))
    else {
        return Line::Skip;
    };
    match data.trim() {
        "" => Line::Skip,
        DONE => Line::Done,
        data => Line::Data(data.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn chunks(parts: Vec<&'static str>) -> impl Stream<Item = Result<Bytes, String>> + Send + Unpin {
        futures::stream::iter(
            parts
                .into_iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes()))),
        )
    }

    async fn collect(parts: Vec<&'static str>) -> Vec<String> {
        sse_data_lines(chunks(parts))
            .map(Result::unwrap)
            .collect()
            .await
    }

    #[test]
    fn line_classification() {
        assert_eq!(classify_line(""), Line::Skip);
        assert_eq!(classify_line(": keep-alive"), Line::Skip);
        assert_eq!(classify_line("event: ping"), Line::Skip);
        assert_eq!(classify_line("data: [DONE]"), Line::Done);
        assert_eq!(classify_line("data:{}"), Line::Data("{}".into()));
        assert_eq!(classify_line("data: {\"a\":1}\r"), Line::Data("{\"a\":1}".into()));
    }

    #[tokio::test]
    async fn yields_data_lines_split_across_chunks() {
        let out = collect(vec!["data: {\"a\"", ":1}\n\ndata: {\"b\":2}\n\n"]).await;
        assert_eq!(out, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn done_marker_ends_stream() {
        let out = collect(vec!["data: 1\n\ndata: [DONE]\n\ndata: 2\n\n"]).await;
        assert_eq!(out, vec!["1"]);
    }

    #[tokio::test]
    async fn comments_are_ignored() {
        let out = collect(vec![": OPENROUTER PROCESSING\n\ndata: x\n\n"]).await;
        assert_eq!(out, vec!["x"]);
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_kept() {
        let out = collect(vec!["data: 1\n", "data: 2"]).await;
        assert_eq!(out, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn read_error_is_surfaced_then_ends() {
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"data: 1\n")),
            Err("reset".to_string()),
            Ok(Bytes::from_static(b"data: 2\n")),
        ]);
        let out: Vec<_> = sse_data_lines(stream).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "1");
        assert_matches!(&out[1], Err(RelayError::Backend(m)) if m.contains("reset"));
    }
}
