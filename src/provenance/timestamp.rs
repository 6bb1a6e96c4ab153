//! Strict ISO-8601 timestamps
//!
//! Only the full RFC 3339 profile is accepted: date, `T`, time with
//! seconds, optional fraction, and a mandatory `Z` or numeric offset.
//! Strings a lenient date parser would take (`2024-01-01`, `2024-01-01
//! 10:00:00`, `Jan 1 2024`) are rejected.

use std::sync::OnceLock;

use chrono::{DateTime, FixedOffset};
use regex_lite::Regex;

const ISO8601_PATTERN: &str =
    r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(\.\d{1,9})?(Z|[+-]\d{2}:\d{2})$";

fn grammar() -> Option<&'static Regex> {
    static GRAMMAR: OnceLock<Option<Regex>> = OnceLock::new();
    GRAMMAR.get_or_init(|| Regex::new(ISO8601_PATTERN).ok()).as_ref()
}

/// Parse `value` if it matches the strict grammar and is a real instant
pub fn parse_strict(value: &str) -> Option<DateTime<FixedOffset>> {
    if !grammar()?.is_match(value) {
        return None;
    }
    DateTime::parse_from_rfc3339(value).ok()
}

/// Whether `value` is a strict ISO-8601 timestamp
pub fn is_strict_iso8601(value: &str) -> bool {
    parse_strict(value).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_full_timestamps() {
        assert!(is_strict_iso8601("2024-01-15T10:30:00Z"));
        assert!(is_strict_iso8601("2024-01-15T10:30:00.123Z"));
        assert!(is_strict_iso8601("2024-01-15T10:30:00+02:00"));
    }

    #[test]
    fn test_rejects_lenient_forms() {
        assert!(!is_strict_iso8601("2024-01-15"));
        assert!(!is_strict_iso8601("2024-01-15 10:30:00Z"));
        assert!(!is_strict_iso8601("2024-01-15T10:30Z"));
        assert!(!is_strict_iso8601("2024-01-15T10:30:00"));
        assert!(!is_strict_iso8601("Mon, 15 Jan 2024 10:30:00 GMT"));
        assert!(!is_strict_iso8601(""));
    }

    #[test]
    fn test_rejects_impossible_dates() {
        assert!(!is_strict_iso8601("2024-02-30T10:30:00Z"));
        assert!(!is_strict_iso8601("2024-13-01T10:30:00Z"));
        assert!(!is_strict_iso8601("2024-01-01T25:00:00Z"));
    }

    #[test]
    fn test_offsets_compare_as_instants() {
        let a = parse_strict("2024-01-15T10:00:00+02:00").unwrap();
        let b = parse_strict("2024-01-15T09:00:00Z").unwrap();
        assert!(a < b);
    }
}
