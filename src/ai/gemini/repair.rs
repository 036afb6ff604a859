//! Lenient repair of streamed JSON fragments.
//!
//! The streaming endpoint returns one JSON array delivered in arbitrary
//! pieces: the first piece opens the array, later pieces start with the
//! separating comma, the last one closes it, and any piece may stop in the
//! middle of an object. Each decoded chunk is coerced into a standalone array
//! of objects here. This is a best-effort pass, not a validating parser:
//! whatever still fails to parse afterwards is logged and dropped.

use serde_json::Value;

const LITERALS: [&str; 3] = ["true", "false", "null"];

#[derive(Debug, Clone, Copy)]
struct Frame {
    closer: char,
    awaiting_key: bool,
}

impl Frame {
    fn object() -> Self {
        Self {
            closer: '}',
            awaiting_key: true,
        }
    }

    fn array() -> Self {
        Self {
            closer: ']',
            awaiting_key: false,
        }
    }
}

/// Parses one decoded chunk into the fragment objects it contains.
///
/// Never fails: an empty chunk yields nothing, and a chunk that cannot be
/// repaired is logged at warn level and contributes zero fragments.
pub fn parse_fragments(chunk: &str) -> Vec<Value> {
    let trimmed = chunk.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let body = trimmed.strip_prefix(',').unwrap_or(trimmed).trim_start();
    // A single leftover character is framing, not a truncated fragment.
    let repaired = if body.len() > 1 {
        repair(body)
    } else {
        body.to_string()
    };
    if repaired.is_empty() {
        return Vec::new();
    }

    let framed = if repaired.starts_with('[') && repaired.ends_with(']') {
        repaired
    } else {
        format!("[{}]", repaired)
    };

    match serde_json::from_str::<Vec<Value>>(&framed) {
        Ok(values) => values.into_iter().filter(Value::is_object).collect(),
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw = %chunk,
                repaired = %framed,
                "Dropping malformed Gemini stream fragment"
            );
            Vec::new()
        }
    }
}

/// Closes whatever `text` left open so it has a chance to parse as JSON.
///
/// Repairing already-valid JSON returns it unchanged, so the pass is stable
/// when applied twice.
pub fn repair(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut frames: Vec<Frame> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut string_is_key = false;
    let mut key_dangling = false;

    for c in text.chars() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                if string_is_key {
                    key_dangling = true;
                    string_is_key = false;
                }
            }
            continue;
        }

        match c {
            '"' => {
                string_is_key = false;
                if let Some(frame) = frames.last_mut() {
                    string_is_key = frame.awaiting_key;
                    frame.awaiting_key = false;
                }
                in_string = true;
                out.push(c);
            }
            '{' => {
                frames.push(Frame::object());
                out.push(c);
            }
            '[' => {
                frames.push(Frame::array());
                out.push(c);
            }
            '}' | ']' => {
                // A closer with no matching opener is stream framing; drop it.
                if frames.iter().any(|frame| frame.closer == c) {
                    while let Some(frame) = frames.pop() {
                        if frame.closer == c {
                            out.push(c);
                            break;
                        }
                        seal(&mut out, &mut key_dangling);
                        out.push(frame.closer);
                    }
                }
            }
            ',' => {
                if let Some(frame) = frames.last_mut() {
                    frame.awaiting_key = frame.closer == '}';
                }
                out.push(c);
            }
            ':' => {
                key_dangling = false;
                out.push(c);
            }
            _ => out.push(c),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        } else {
            trim_partial_unicode_escape(&mut out);
        }
        out.push('"');
        if string_is_key {
            key_dangling = true;
        }
    }

    while let Some(frame) = frames.pop() {
        seal(&mut out, &mut key_dangling);
        out.push(frame.closer);
    }

    trim_trailing_separators(&mut out);
    out
}

/// Tidies the tail of an open container before it gets auto-closed.
fn seal(out: &mut String, key_dangling: &mut bool) {
    complete_partial_token(out);
    trim_trailing_separators(out);
    if *key_dangling {
        out.push_str(":null");
        *key_dangling = false;
    } else if out.ends_with(':') {
        out.push_str("null");
    }
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+')
}

/// Finishes a truncated literal (`tru`) or number (`1.`, `2e`, `-`).
fn complete_partial_token(out: &mut String) {
    out.truncate(out.trim_end().len());

    let start = out
        .char_indices()
        .rev()
        .find(|(_, c)| !is_token_char(*c))
        .map_or(0, |(i, c)| i + c.len_utf8());
    let token = &out[start..];
    if token.is_empty() {
        return;
    }

    if let Some(literal) = LITERALS.iter().find(|lit| lit.starts_with(token)) {
        out.truncate(start);
        out.push_str(literal);
        return;
    }

    if token.starts_with(|c: char| c == '-' || c.is_ascii_digit()) {
        while out.len() > start && out.ends_with(|c: char| matches!(c, '.' | 'e' | 'E' | '+' | '-'))
        {
            out.pop();
        }
    }
}

fn trim_trailing_separators(out: &mut String) {
    while out.ends_with(|c: char| c == ',' || c.is_whitespace()) {
        out.pop();
    }
}

/// Drops a `\u` escape cut off before its four hex digits.
fn trim_partial_unicode_escape(out: &mut String) {
    let bytes = out.as_bytes();
    let len = bytes.len();
    for digits in 0..4 {
        if len < digits + 2 {
            break;
        }
        let u = len - digits - 1;
        if bytes[u] != b'u' || bytes[u - 1] != b'\\' {
            continue;
        }
        if !bytes[u + 1..].iter().all(u8::is_ascii_hexdigit) {
            continue;
        }
        let backslashes = bytes[..u].iter().rev().take_while(|b| **b == b'\\').count();
        if backslashes % 2 == 1 {
            out.truncate(u - 1);
            return;
        }
    }
}
