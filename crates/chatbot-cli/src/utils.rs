//! Shared utilities

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// `s` flattened to a single line and shortened for status output
pub fn preview(s: &str, max: usize) -> String {
    truncate_chars(&s.replace('\n', " "), max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello...");
        assert_eq!(truncate_chars("привет мир", 6), "привет...");
    }

    #[test]
    fn test_preview_flattens_lines() {
        assert_eq!(preview("a\nb", 10), "a b");
    }
}
