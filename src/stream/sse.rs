// Outbound SSE framing and inbound NDJSON line splitting.
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use memchr::memchr;

use crate::util::push_json_string_escaped;

const DONE_FRAME: &str = "data: [DONE]\n\n";
const EMPTY_OBJECT_FRAME: &str = "data: {}\n\n";

/// Format a `[DONE]` frame as SSE text.
#[must_use]
pub fn done_frame() -> String {
    DONE_FRAME.to_owned()
}

/// Terminal frame of the legacy generate stream.
#[must_use]
pub fn empty_object_frame() -> String {
    EMPTY_OBJECT_FRAME.to_owned()
}

/// Inline error frame for failures after the response status was sent.
#[must_use]
pub fn error_frame(message: &str, kind: &str) -> String {
    let mut out = String::with_capacity(48 + message.len() + kind.len());
    out.push_str("data: {\"error\":{\"message\":");
    push_json_string_escaped(&mut out, message);
    out.push_str(",\"type\":");
    push_json_string_escaped(&mut out, kind);
    out.push_str("}}\n\n");
    out
}

#[inline]
fn trim_line(mut line: &[u8]) -> &[u8] {
    while let Some((&last, rest)) = line.split_last() {
        if last == b'\n' || last == b'\r' {
            line = rest;
        } else {
            break;
        }
    }
    line
}

#[inline]
fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Split a byte stream into newline-delimited records.
///
/// Records are yielded without their line terminator; blank lines are
/// skipped. A transport error is yielded once and ends the stream. Trailing
/// bytes without a final newline are yielded as the last record.
pub fn ndjson_line_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<Bytes, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (Box::pin(byte_stream), BytesMut::with_capacity(4096), 0usize, false),
        |(mut stream, mut buffer, mut scan_from, finished)| async move {
            if finished {
                return None;
            }
            loop {
                if let Some(rel) = memchr(b'\n', &buffer[scan_from..]) {
                    let line = buffer.split_to(scan_from + rel + 1).freeze();
                    scan_from = 0;
                    let trimmed = trim_line(&line);
                    if is_blank(trimmed) {
                        continue;
                    }
                    let record = line.slice(..trimmed.len());
                    return Some((Ok(record), (stream, buffer, scan_from, false)));
                }
                scan_from = buffer.len();

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => buffer.extend_from_slice(bytes.as_ref()),
                    Some(Err(err)) => return Some((Err(err), (stream, buffer, 0, true))),
                    None => {
                        let rest = buffer.split().freeze();
                        let trimmed = trim_line(&rest);
                        if is_blank(trimmed) {
                            return None;
                        }
                        let record = rest.slice(..trimmed.len());
                        return Some((Ok(record), (stream, buffer, 0, true)));
                    }
                }
            }
        },
    )
}
