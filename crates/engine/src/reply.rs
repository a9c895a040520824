//! Reply text shaping for the messaging transport.

/// Longest reply sent before truncation, in characters.
pub const MAX_REPLY_CHARS: usize = 1900;

/// Longest prompt echoed back by prompt commands, in characters.
pub const MAX_PROMPT_ECHO_CHARS: usize = 900;

/// Marker appended to truncated replies.
pub const ELLIPSIS: char = '…';

/// The first `max` characters of `text`.
pub fn take_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Fit `text` to the transport limit.
///
/// Text of at most [`MAX_REPLY_CHARS`] characters is returned unchanged;
/// longer text is cut to that many characters followed by [`ELLIPSIS`].
pub fn truncate_for_transport(text: &str) -> String {
    let head = take_chars(text, MAX_REPLY_CHARS);
    if head.len() == text.len() {
        return text.to_string();
    }
    let mut out = String::with_capacity(head.len() + ELLIPSIS.len_utf8());
    out.push_str(head);
    out.push(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(truncate_for_transport("hello"), "hello");
        assert_eq!(truncate_for_transport(""), "");
    }

    #[test]
    fn boundary_is_inclusive() {
        let exact = "x".repeat(MAX_REPLY_CHARS);
        assert_eq!(truncate_for_transport(&exact), exact);
    }

    #[test]
    fn long_text_is_cut_with_ellipsis() {
        let long = "y".repeat(MAX_REPLY_CHARS + 500);
        let out = truncate_for_transport(&long);
        assert_eq!(out.chars().count(), MAX_REPLY_CHARS + 1);
        assert!(out.ends_with(ELLIPSIS));
        assert_eq!(&out[..MAX_REPLY_CHARS], &long[..MAX_REPLY_CHARS]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let wide = "字".repeat(MAX_REPLY_CHARS + 1);
        let out = truncate_for_transport(&wide);
        assert_eq!(out.chars().count(), MAX_REPLY_CHARS + 1);
        assert_eq!(out.chars().filter(|c| *c == '字').count(), MAX_REPLY_CHARS);

        let fits = "字".repeat(MAX_REPLY_CHARS);
        assert_eq!(truncate_for_transport(&fits), fits);
    }

    #[test]
    fn take_chars_respects_boundaries() {
        assert_eq!(take_chars("héllo", 2), "hé");
        assert_eq!(take_chars("abc", 10), "abc");
        assert_eq!(take_chars("abc", 0), "");
    }
}
