//! Newline framing for streamed HTTP bodies
//!
//! Network chunks do not line up with JSON documents: one chunk can carry half
//! a line or several lines. Both NDJSON (Ollama) and SSE (Gemini) are
//! newline-delimited, so both backends reassemble lines here first.

use futures_util::stream::{Stream, StreamExt};

use super::LlmError;

/// Split a byte stream into complete lines (without the trailing `\n` / `\r\n`).
///
/// Empty lines are yielded; a final unterminated line is flushed at the end.
pub fn lines<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<LlmError> + Send,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk: B = chunk.map_err(Into::<LlmError>::into)?;
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                yield decode(&line[..line.len() - 1]);
            }
        }

        if !buffer.is_empty() {
            yield decode(&buffer);
        }
    }
}

fn decode(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// Payload of an SSE `data:` line, if the line is one.
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    async fn collect(chunks: Vec<&'static str>) -> Vec<String> {
        let input = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, LlmError>(c.as_bytes().to_vec())),
        );
        lines(input)
            .map(|l| l.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_reassembles_split_lines() {
        let out = collect(vec!["{\"a\":", "1}\n{\"b\"", ":2}\n"]).await;
        assert_eq!(out, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[tokio::test]
    async fn test_flushes_unterminated_tail_and_strips_cr() {
        let out = collect(vec!["one\r\ntwo\n\nthree"]).await;
        assert_eq!(out, vec!["one", "two", "", "three"]);
    }

    #[test]
    fn test_sse_data() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("data:{}"), Some("{}"));
        assert_eq!(sse_data("event: ping"), None);
    }
}
