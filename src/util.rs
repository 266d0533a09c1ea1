//! Small utility helpers shared across the crate.

use std::env;

/// Return the first non-empty environment variable from `keys`, or `None`.
pub fn env_first(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = env::var(key) {
            if !value.trim().is_empty() {
                return Some(value);
            }
        }
    }
    None
}

/// Decode raw bus bytes as UTF-8, silently dropping invalid sequences,
/// then pass the result through [`sanitize_text`].
pub fn sanitize_bytes(bytes: &[u8]) -> String {
    let mut decoded = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        decoded.push_str(chunk.valid());
    }
    sanitize_text(&decoded)
}

/// Strip characters that do not survive a trip through the bus: NUL and
/// other control characters (newlines and tabs are kept) and any
/// replacement characters left over from a lossy decode upstream.
pub fn sanitize_text(text: &str) -> String {
    text.chars()
        .filter(|c| *c == '\n' || *c == '\t' || !c.is_control())
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}
