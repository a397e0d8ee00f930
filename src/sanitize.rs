//! Turns arbitrary video titles into names that are safe on common
//! filesystems.

/// Characters rejected by Windows and awkward everywhere else.
const INVALID_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Upper bound on the sanitized name, counted in characters.
pub const MAX_FILENAME_CHARS: usize = 200;

/// Base name used when a title sanitizes down to nothing.
pub const FALLBACK_FILENAME: &str = "video";

/// Strips invalid characters, collapses whitespace runs into single spaces
/// and truncates to [`MAX_FILENAME_CHARS`].
pub fn clean_filename(title: &str) -> String {
    let stripped: String = title
        .chars()
        .filter(|c| !INVALID_CHARS.contains(c) && !c.is_control())
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_FILENAME_CHARS).collect();
    let trimmed = truncated.trim_end();
    if trimmed.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_filename_strips_invalid_characters() {
        let cleaned = clean_filename(r#"a<b>c:d"e/f\g|h?i*j"#);
        assert_eq!(cleaned, "abcdefghij");
        assert!(!cleaned.chars().any(|c| INVALID_CHARS.contains(&c)));
    }

    #[test]
    fn clean_filename_collapses_whitespace() {
        assert_eq!(clean_filename("  My   Video \t Title  "), "My Video Title");
        assert_eq!(clean_filename("Live: Part 1 / 2"), "Live Part 1 2");
        assert!(!clean_filename("a  ?  b").contains("  "));
    }

    #[test]
    fn clean_filename_caps_length_in_characters() {
        let long = "é".repeat(500);
        let cleaned = clean_filename(&long);
        assert_eq!(cleaned.chars().count(), MAX_FILENAME_CHARS);

        let spaced = format!("{} tail", "x".repeat(199));
        let cleaned = clean_filename(&spaced);
        assert!(cleaned.chars().count() <= MAX_FILENAME_CHARS);
        assert!(!cleaned.ends_with(' '));
    }

    #[test]
    fn clean_filename_falls_back_for_empty_titles() {
        assert_eq!(clean_filename("???"), FALLBACK_FILENAME);
        assert_eq!(clean_filename(""), FALLBACK_FILENAME);
    }
}
