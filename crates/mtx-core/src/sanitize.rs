// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error-message sanitization.
//!
//! Raw transport errors can leak credentials, user paths, or file URLs.
//! [`sanitize_error_message`] redacts those and bounds the length before the
//! text reaches response metadata, lifecycle trackers, or logs.

use regex::Regex;
use std::sync::LazyLock;

/// Longest sanitized message, in characters, including the `...` marker.
const MAX_MESSAGE_CHARS: usize = 200;

const REDACTED: &str = "[REDACTED]";

static SENSITIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)password[=:]\s*\S+",
        r"(?i)token[=:]\s*\S+",
        r"(?i)key[=:]\s*\S+",
        r"(?i)secret[=:]\s*\S+",
        r"(?i)auth[=:]\s*\S+",
        r"(?i)/Users/[^/\s]+",
        r"(?i)/home/[^/\s]+",
        r"(?i)file://\S+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("sanitizer pattern"))
    .collect()
});

/// Redact credential-shaped tokens, user home paths, and `file://` URLs,
/// then truncate to [`MAX_MESSAGE_CHARS`] characters.
///
/// Pure and deterministic; safe to apply more than once.
#[must_use]
pub fn sanitize_error_message(raw: &str) -> String {
    let mut message = raw.to_string();
    for pattern in SENSITIVE_PATTERNS.iter() {
        message = pattern.replace_all(&message, REDACTED).into_owned();
    }

    if message.chars().count() > MAX_MESSAGE_CHARS {
        let mut truncated: String = message.chars().take(MAX_MESSAGE_CHARS - 3).collect();
        truncated.push_str("...");
        return truncated;
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn redacts_credentials() {
        let raw = "request failed: password=hunter2 token: abc123 key=xyz";
        let clean = sanitize_error_message(raw);
        assert!(!clean.contains("hunter2"), "{clean}");
        assert!(!clean.contains("abc123"), "{clean}");
        assert!(!clean.contains("xyz"), "{clean}");
        assert!(clean.contains(REDACTED));
    }

    #[test]
    fn redaction_is_case_insensitive() {
        let clean = sanitize_error_message("PASSWORD=topsecret SECRET: shhh");
        assert!(!clean.contains("topsecret"), "{clean}");
        assert!(!clean.contains("shhh"), "{clean}");
    }

    #[test]
    fn redacts_user_paths_and_file_urls() {
        let raw = "open /Users/alice/notes failed; see /home/bob/log and file:///tmp/x";
        let clean = sanitize_error_message(raw);
        assert!(!clean.contains("alice"), "{clean}");
        assert!(!clean.contains("bob"), "{clean}");
        assert!(!clean.contains("file:///tmp/x"), "{clean}");
    }

    #[test]
    fn truncates_to_two_hundred_chars() {
        let raw = "x".repeat(500);
        let clean = sanitize_error_message(&raw);
        assert_eq!(clean.chars().count(), 200);
        assert!(clean.ends_with("..."));
    }

    #[test]
    fn short_messages_pass_through() {
        assert_eq!(sanitize_error_message("plain failure"), "plain failure");
    }

    #[test]
    fn exactly_two_hundred_chars_is_untouched() {
        let raw = "y".repeat(200);
        assert_eq!(sanitize_error_message(&raw), raw);
    }

    proptest! {
        #[test]
        fn output_never_exceeds_bound(raw in ".{0,600}") {
            let clean = sanitize_error_message(&raw);
            prop_assert!(clean.chars().count() <= 200);
        }

        #[test]
        fn sanitization_is_idempotent(raw in "[ -~]{0,300}") {
            let once = sanitize_error_message(&raw);
            let twice = sanitize_error_message(&once);
            prop_assert_eq!(once, twice);
        }
    }
}
