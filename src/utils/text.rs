/// Default number of characters kept when previewing task output.
pub const PREVIEW_CHARS: usize = 300;

/// Returns at most `max_chars` characters of `text`, cut on a char boundary.
#[must_use]
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[must_use]
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Slice from the first `{` to the last `}`.
///
/// Models routinely wrap JSON in prose or markdown fences; every parse of
/// model output goes through here first. Returns `None` when no object-shaped
/// span exists.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
