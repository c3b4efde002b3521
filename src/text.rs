//! Small text helpers shared across modules

/// First `max` chars of `text` (char-boundary safe)
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Single-line preview: whitespace collapsed, cut at `max` chars with "..."
pub fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        format!("{}...", truncate_chars(&flat, max.saturating_sub(3)))
    }
}

/// Lowercase alphanumeric tokens of at least two chars
pub fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate_chars("héllo", 2), "hé");
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("a  b\nc", 20), "a b c");
        assert_eq!(preview("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_tokens() {
        let t: Vec<_> = tokens("Use SQLite, a db!").collect();
        assert_eq!(t, vec!["use", "sqlite", "db"]);
    }
}
