//! Text normalization helpers
//!
//! Bounds are measured in characters, not bytes, so truncation never splits
//! a UTF-8 code point.

/// Truncate `value` to at most `max_chars` characters.
pub fn truncate_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &value[..byte_idx],
        None => value,
    }
}

/// Owned variant of [`truncate_chars`] for optional fields.
pub fn bounded(value: Option<String>, max_chars: usize) -> Option<String> {
    value.map(|v| truncate_chars(&v, max_chars).to_string())
}

/// Collapse every run of whitespace into a single space and trim the ends.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `None` for empty or whitespace-only input, otherwise the trimmed value.
pub fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
