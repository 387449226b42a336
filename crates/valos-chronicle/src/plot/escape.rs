// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Percent-encoding for literal plot segments.
//!
//! Reserved bytes: `%`, `@`, `:`, `/`, and anything outside printable ASCII
//! (`0x21..=0x7E`). Escapes are emitted in uppercase hex. The reserved set is
//! part of the wire format: widening it changes canonical strings.

use super::PlotError;

fn is_reserved(byte: u8) -> bool {
    !(0x21..=0x7e).contains(&byte) || matches!(byte, b'%' | b'@' | b':' | b'/')
}

/// Percent-encodes reserved bytes of `text`.
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for &byte in text.as_bytes() {
        if is_reserved(byte) {
            out.push('%');
            out.push_str(&format!("{byte:02X}"));
        } else {
            out.push(char::from(byte));
        }
    }
    out
}

/// Escapes a path segment or `:` param.
///
/// An all-digit segment also gets its first digit escaped, so a literal `"3"`
/// can never re-parse as IRI-table index 3.
pub fn escape_segment(text: &str) -> String {
    let escaped = escape_literal(text);
    match escaped.as_bytes().first() {
        Some(first) if escaped.bytes().all(|b| b.is_ascii_digit()) => {
            format!("%{first:02X}{}", &escaped[1..])
        }
        _ => escaped,
    }
}

/// Decodes `%XX` escapes. Raw reserved bytes are not rejected here; the
/// callers split on them before decoding.
pub fn unescape_literal(text: &str, offset: usize) -> Result<String, PlotError> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|pair| std::str::from_utf8(pair).ok())
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or(PlotError::InvalidEscape { offset: offset + i })?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| PlotError::InvalidEscape { offset })
}
