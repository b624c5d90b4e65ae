//! Text helpers shared by the context engine: token estimation, char-safe
//! truncation and whitespace cleanup of model output.

use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;

use crate::memory::Message;

lazy_static! {
    static ref BLANK_LINES_REGEX: Regex = Regex::new(r"\n{3,}").unwrap();
    static ref INLINE_SPACE_REGEX: Regex = Regex::new(r"[ \t]{2,}").unwrap();
}

/// Roughly four characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

pub struct TextUtils;

impl TextUtils {
    /// Cheap token estimate: `floor(chars / 4)`.
    ///
    /// Counts Unicode scalar values rather than bytes so that the estimate for
    /// non-ASCII prose matches the character-based truncation used elsewhere.
    /// Monotonic non-decreasing in input length.
    pub fn estimate_tokens(text: &str) -> usize {
        text.chars().count() / CHARS_PER_TOKEN
    }

    /// Sum of [`TextUtils::estimate_tokens`] over every message body.
    pub fn estimate_messages(messages: &[Message]) -> usize {
        messages.iter().map(|m| Self::estimate_tokens(&m.content)).sum()
    }

    /// Number of characters in `text`.
    pub fn char_len(text: &str) -> usize {
        text.chars().count()
    }

    /// First `max_chars` characters of `text`, never splitting a code point.
    pub fn truncate_chars(text: &str, max_chars: usize) -> Cow<'_, str> {
        match text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => Cow::Borrowed(&text[..byte_idx]),
            None => Cow::Borrowed(text),
        }
    }

    /// Collapse runs of blank lines and repeated inline spaces, then trim.
    /// Paragraph breaks survive so summaries stay readable prose.
    pub fn tidy_model_output(text: &str) -> Cow<'_, str> {
        let needs_work = BLANK_LINES_REGEX.is_match(text)
            || INLINE_SPACE_REGEX.is_match(text)
            || text.trim().len() != text.len();
        if !needs_work {
            return Cow::Borrowed(text);
        }
        let collapsed = BLANK_LINES_REGEX.replace_all(text, "\n\n");
        let collapsed = INLINE_SPACE_REGEX.replace_all(&collapsed, " ");
        Cow::Owned(collapsed.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_estimate_tokens_known_values() {
        assert_eq!(TextUtils::estimate_tokens(""), 0);
        assert_eq!(TextUtils::estimate_tokens("abc"), 0);
        assert_eq!(TextUtils::estimate_tokens("abcd"), 1);
        assert_eq!(TextUtils::estimate_tokens("abcdefghi"), 2);
    }

    #[test]
    fn test_estimate_tokens_counts_chars_not_bytes() {
        // four two-byte characters
        assert_eq!(TextUtils::estimate_tokens("éééé"), 1);
    }

    #[test]
    fn test_estimate_messages_sums_contents() {
        let messages = vec![
            Message::system("abcd"),
            Message::user("abcdefgh"),
        ];
        assert_eq!(TextUtils::estimate_messages(&messages), 3);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(TextUtils::truncate_chars("hello world", 5), "hello");
        assert_eq!(TextUtils::truncate_chars("hi", 5), "hi");
        assert_eq!(TextUtils::truncate_chars("", 0), "");
        assert_eq!(TextUtils::truncate_chars("héllo", 2), "hé");
    }

    #[test]
    fn test_tidy_model_output() {
        assert_eq!(TextUtils::tidy_model_output("clean"), "clean");
        assert_eq!(
            TextUtils::tidy_model_output("  a  b\n\n\n\nc \n"),
            "a b\n\nc"
        );
    }

    proptest! {
        #[test]
        fn prop_estimate_is_monotonic(base in ".{0,200}", extra in ".{0,50}") {
            let longer = format!("{}{}", base, extra);
            prop_assert!(TextUtils::estimate_tokens(&base) <= TextUtils::estimate_tokens(&longer));
        }

        #[test]
        fn prop_truncate_never_exceeds_limit(text in ".{0,300}", limit in 0usize..400) {
            let cut = TextUtils::truncate_chars(&text, limit);
            prop_assert!(TextUtils::char_len(&cut) <= limit);
            prop_assert!(text.starts_with(cut.as_ref()));
        }
    }
}
