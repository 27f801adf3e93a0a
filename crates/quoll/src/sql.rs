//! Placeholder-dialect normalization.
//!
//! Statements may bind parameters in the native dialect (`$1`, `$2`, …) or
//! with unified `?` markers. Before anything reaches the wire, `?` markers
//! are rewritten to `$n` in left-to-right order. The scanner is a single
//! pass over the raw bytes with two quote states, so markers inside string
//! literals and quoted identifiers (including doubled-quote escapes like
//! `'O''Brien'`) are left untouched.

use std::borrow::Cow;

use crate::{Error, Result};

/// Bytes that may legally precede a unified `?` marker.
const MARKER_PRECEDERS: &[u8] = b" \t\r\n,(=<>!";

#[derive(Clone, Copy, PartialEq)]
enum State {
    Plain,
    SingleQuoted,
    DoubleQuoted,
}

/// Rewrite unified `?` markers to the native `$n` dialect.
///
/// Returns the input unchanged when it contains no `?` outside literals.
/// Fails with [`Error::BadPlaceholders`] when the statement mixes dialects
/// or places a `?` where only an identifier could be.
pub fn normalize_placeholders(sql: &str) -> Result<Cow<'_, str>> {
    let bytes = sql.as_bytes();
    let mut state = State::Plain;
    let mut markers = Vec::new();
    let mut has_native = false;

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match state {
            State::Plain => match b {
                b'\'' => state = State::SingleQuoted,
                b'"' => state = State::DoubleQuoted,
                b'$' => {
                    if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
                        has_native = true;
                    }
                }
                b'?' => {
                    let ok = i == 0 || MARKER_PRECEDERS.contains(&bytes[i - 1]);
                    if !ok {
                        return Err(Error::BadPlaceholders(format!(
                            "'?' at byte {i} is not preceded by whitespace or an operator"
                        )));
                    }
                    markers.push(i);
                }
                _ => {}
            },
            State::SingleQuoted => {
                if b == b'\'' {
                    // A doubled quote is an escaped quote inside the literal.
                    if bytes.get(i + 1) == Some(&b'\'') {
                        i += 1;
                    } else {
                        state = State::Plain;
                    }
                }
            }
            State::DoubleQuoted => {
                if b == b'"' {
                    if bytes.get(i + 1) == Some(&b'"') {
                        i += 1;
                    } else {
                        state = State::Plain;
                    }
                }
            }
        }
        i += 1;
    }

    if markers.is_empty() {
        return Ok(Cow::Borrowed(sql));
    }
    if has_native {
        return Err(Error::BadPlaceholders(
            "statement mixes '?' markers with native '$n' placeholders".into(),
        ));
    }

    let mut out = String::with_capacity(sql.len() + markers.len());
    let mut cursor = 0;
    for (n, &at) in markers.iter().enumerate() {
        out.push_str(&sql[cursor..at]);
        out.push('$');
        out.push_str(&(n + 1).to_string());
        cursor = at + 1;
    }
    out.push_str(&sql[cursor..]);

    Ok(Cow::Owned(out))
}
