//! Helpers for the session's line-oriented message protocol.
//!
//! Outbound frames start with a textual command token (`tile:`,
//! `invalidatecursor:`, `progress:`, …). Binary frames carry the same
//! textual header on their first line, followed by raw payload bytes, so
//! all helpers here operate on byte slices and only decode the textual
//! prefix.

use std::borrow::Cow;

/// Longest abbreviated rendering produced by [`abbreviated_message`].
pub const ABBREVIATED_MAX_LEN: usize = 128;

/// The bytes of the first line, excluding the trailing `\n` (and a `\r`
/// preceding it, if any).
pub fn first_line_bytes(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .position(|&b| b == b'\n')
        .unwrap_or(data.len());
    let line = &data[..end];
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// First line of the payload, lossy-decoded.
pub fn first_line(data: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(first_line_bytes(data))
}

/// The command token: everything up to the first whitespace of the first
/// line. Empty for empty payloads.
pub fn first_token(data: &[u8]) -> Cow<'_, str> {
    let line = first_line_bytes(data);
    let end = line
        .iter()
        .position(|b| b.is_ascii_whitespace())
        .unwrap_or(line.len());
    String::from_utf8_lossy(&line[..end])
}

/// Whether the payload's command token equals `token`.
pub fn first_token_matches(data: &[u8], token: &str) -> bool {
    first_token(data) == token
}

/// Short diagnostic rendering of a message: its first line, capped at
/// [`ABBREVIATED_MAX_LEN`] bytes with a `...` suffix when truncated.
///
/// Used by queue dumps; never fails on binary payloads (lossy decode).
pub fn abbreviated_message(data: &[u8]) -> String {
    let line = first_line_bytes(data);
    if line.len() <= ABBREVIATED_MAX_LEN {
        return String::from_utf8_lossy(line).into_owned();
    }

    // Back off to a UTF-8 boundary so the lossy decode of the prefix does
    // not invent a replacement character at the cut.
    let mut end = ABBREVIATED_MAX_LEN;
    while end > 0 && (line[end] & 0b1100_0000) == 0b1000_0000 {
        end -= 1;
    }
    let mut out = String::from_utf8_lossy(&line[..end]).into_owned();
    out.push_str("...");
    out
}
