//! Mask matching and parameter hygiene helpers.

use crate::casemap::irc_lower_char;

/// Maximum serialized frame length, excluding CRLF.
pub const MAX_FRAME_LEN: usize = 510;

/// Match `text` against a glob `pattern` with `*` (any run) and `?` (any one
/// character), case-insensitively under the RFC 1459 mapping.
///
/// Ban masks, list-mode entries, and resv masks all match through here.
///
/// # Examples
///
/// ```
/// use meshirc_proto::util::wildcard_match;
///
/// assert!(wildcard_match("*!*@*.example.net", "ann!ops@gw.example.net"));
/// assert!(wildcard_match("bad?user@*", "badXuser@anywhere"));
/// assert!(wildcard_match("#CHAN[1]", "#chan{1}"));
/// assert!(!wildcard_match("spam*", "ham"));
/// ```
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().map(irc_lower_char).collect();
    let txt: Vec<char> = text.chars().map(irc_lower_char).collect();

    // Iterative matcher with single-star backtracking.
    let (mut p, mut t) = (0usize, 0usize);
    let mut restart: Option<(usize, usize)> = None;

    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            restart = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = restart {
            p = sp + 1;
            t = st + 1;
            restart = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    pat[p..].iter().all(|&c| c == '*')
}

/// Truncate `s` to at most `max_bytes` bytes without splitting a UTF-8
/// codepoint.
///
/// Mode parameters and ban masks are clamped through here before they reach
/// channel state, so a hostile peer cannot smuggle an over-long value.
#[inline]
pub fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Clean a mode parameter: cut at the first whitespace, then clamp to
/// `max_bytes`. Returns `None` for values that can never be a parameter
/// (empty, or starting with `:`).
pub fn clean_param(raw: &str, max_bytes: usize) -> Option<String> {
    let head = raw.split_whitespace().next().unwrap_or("");
    if head.is_empty() || head.starts_with(':') {
        return None;
    }
    Some(truncate_utf8_safe(head, max_bytes).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_basics() {
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("a?c", "abc"));
        assert!(!wildcard_match("a?c", "ac"));
        assert!(wildcard_match("*x*y*", "axbyc"));
        assert!(!wildcard_match("", "x"));
        assert!(wildcard_match("", ""));
    }

    #[test]
    fn glob_hostmasks() {
        assert!(wildcard_match("*!*@*", "n!u@h"));
        assert!(wildcard_match("*@192.168.*", "ident@192.168.0.40"));
        assert!(!wildcard_match("*@10.*", "ident@192.168.0.40"));
    }

    #[test]
    fn glob_is_case_insensitive() {
        assert!(wildcard_match("NICK|*", "nick\\one"));
        assert!(wildcard_match("*[ops]", "team{OPS}"));
    }

    #[test]
    fn truncation_respects_boundaries() {
        assert_eq!(truncate_utf8_safe("abcdef", 4), "abcd");
        assert_eq!(truncate_utf8_safe("caf\u{e9}", 4), "caf");
        assert_eq!(truncate_utf8_safe("short", 64), "short");
        assert_eq!(truncate_utf8_safe("abc", 0), "");
    }

    #[test]
    fn clean_param_rejects_junk() {
        assert_eq!(clean_param("ok", 10), Some("ok".into()));
        assert_eq!(clean_param("two words", 10), Some("two".into()));
        assert_eq!(clean_param(":trailing", 10), None);
        assert_eq!(clean_param("", 10), None);
        assert_eq!(clean_param("   ", 10), None);
        assert_eq!(clean_param("longvalue", 4), Some("long".into()));
    }
}
