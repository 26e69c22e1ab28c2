use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TOOL_CALL_SEQ: AtomicU64 = AtomicU64::new(1);

pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

/// Process-unique id for a tool call the backend left unnamed.
pub(crate) fn next_call_id() -> String {
    let seq = TOOL_CALL_SEQ.fetch_add(1, Ordering::Relaxed);
    format_request_seq_hex("call_", seq)
}

/// `prefix` followed by `seq` as 16 lowercase hex digits.
pub(crate) fn format_request_seq_hex(prefix: &str, seq: u64) -> String {
    format!("{prefix}{seq:016x}")
}

#[inline]
pub(crate) fn push_u64_decimal(out: &mut String, value: u64) {
    let _ = write!(out, "{value}");
}

/// Append `value` as a quoted JSON string.
pub(crate) fn push_json_string_escaped(out: &mut String, value: &str) {
    out.reserve(value.len() + 2);
    out.push('"');
    let mut start = 0;
    for (idx, byte) in value.bytes().enumerate() {
        let escape = match byte {
            b'"' => "\\\"",
            b'\\' => "\\\\",
            b'\n' => "\\n",
            b'\r' => "\\r",
            b'\t' => "\\t",
            0x08 => "\\b",
            0x0c => "\\f",
            0x00..=0x1f => "",
            _ => continue,
        };
        out.push_str(&value[start..idx]);
        if escape.is_empty() {
            let _ = write!(out, "\\u{byte:04x}");
        } else {
            out.push_str(escape);
        }
        start = idx + 1;
    }
    out.push_str(&value[start..]);
    out.push('"');
}

/// Largest `k < marker.len()` such that `text` ends with the first `k` bytes
/// of `marker`, restricted to char boundaries on both sides.
pub(crate) fn partial_prefix_suffix_len(text: &str, marker: &str) -> usize {
    let longest = marker.len().saturating_sub(1).min(text.len());
    (1..=longest)
        .rev()
        .find(|&k| marker.is_char_boundary(k) && text.ends_with(&marker[..k]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{format_request_seq_hex, next_call_id, partial_prefix_suffix_len, push_json_string_escaped};

    #[test]
    fn request_ids_are_zero_padded_hex() {
        assert_eq!(
            format_request_seq_hex("chatcmpl-", 0x1234_abcd_u64),
            "chatcmpl-000000001234abcd"
        );
        assert_eq!(
            format_request_seq_hex("chatcmpl-", u64::MAX),
            "chatcmpl-ffffffffffffffff"
        );
    }

    #[test]
    fn call_ids_are_distinct() {
        let first = next_call_id();
        let second = next_call_id();
        assert!(first.starts_with("call_"));
        assert_ne!(first, second);
    }

    #[test]
    fn escaped_strings_agree_with_serde_json() {
        for input in [
            "",
            "plain ascii",
            "quote \" and slash \\",
            "line\nbreak\r\n",
            "\u{08}\u{0c}\t",
            "control \u{001f} tail",
            "emoji 😀 café",
            "mix \"😀\\\n\t\r\u{0000}",
        ] {
            let mut out = String::new();
            push_json_string_escaped(&mut out, input);
            assert_eq!(out, serde_json::to_string(input).expect("serialize"));
        }
    }

    #[test]
    fn partial_prefix_suffix_len_finds_longest_marker_prefix() {
        assert_eq!(partial_prefix_suffix_len("Hello <th", "<think>"), 3);
        assert_eq!(partial_prefix_suffix_len("Hello <", "<think>"), 1);
        assert_eq!(partial_prefix_suffix_len("Hello", "<think>"), 0);
        assert_eq!(partial_prefix_suffix_len("x</think", "</think>"), 7);
        // A complete marker is never reported as a partial one.
        assert_eq!(partial_prefix_suffix_len("<think>", "<think>"), 0);
        assert_eq!(partial_prefix_suffix_len("café", "<think>"), 0);
    }
}
