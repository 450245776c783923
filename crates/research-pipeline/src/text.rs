//! Small string helpers shared by prompts, notes and stream previews

/// At most `max_chars` characters, never splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Like [`truncate_chars`] but appends "..." when something was cut
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    let cut = truncate_chars(text, max_chars);
    if cut.len() < text.len() {
        format!("{}...", cut)
    } else {
        cut.to_string()
    }
}

/// Newlines and runs of whitespace collapsed to single spaces
pub fn flatten_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word-boundary, case-insensitive match of any of `words`
pub fn contains_word(text: &str, words: &[&str]) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .any(|token| words.iter().any(|w| token.eq_ignore_ascii_case(w)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc...");
        assert_eq!(truncate_with_ellipsis("abc", 3), "abc");
    }

    #[test]
    fn test_flatten_whitespace() {
        assert_eq!(flatten_whitespace("a\nb\n\n  c"), "a b c");
    }

    #[test]
    fn test_contains_word_uses_boundaries() {
        assert!(contains_word("That is ENOUGH research.", &["enough"]));
        assert!(contains_word("stop", &["enough", "stop"]));
        assert!(!contains_word("nonstop searching", &["stop"]));
        assert!(!contains_word("insufficiently covered", &["sufficient"]));
    }
}
