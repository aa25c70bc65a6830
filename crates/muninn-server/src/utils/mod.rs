//! crates/muninn-server/src/utils/mod.rs
//! Shared utility functions used across the codebase

use std::fmt::Display;
use std::path::Path;

/// Extension trait for Result to simplify error conversion to String.
pub trait ResultExt<T, E> {
    /// Convert the error type to String.
    fn str_err(self) -> Result<T, String>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    fn str_err(self) -> Result<T, String> {
        self.map_err(|e| e.to_string())
    }
}

/// Convert a Path to an owned String, replacing invalid UTF-8 with U+FFFD.
pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Truncate a string to max length with ellipsis.
///
/// Truncation is on a char boundary; the total length may be `max_len + 3`.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Tail of a string, at most `max_len` bytes (char-boundary safe).
pub fn tail(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut start = s.len() - max_len;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Estimate token count for budget accounting: ceil(chars / 4).
pub fn estimate_tokens(s: &str) -> usize {
    s.chars().count().div_ceil(4)
}

/// Escape text for XML content and attribute values (`& < > "`).
pub fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Days between an ISO-8601/SQLite timestamp and now, saturating at 0.
pub fn age_days(timestamp: &str) -> f64 {
    let parsed = chrono::DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        });
    match parsed {
        Ok(dt) => {
            let secs = chrono::Utc::now().signed_duration_since(dt).num_seconds();
            (secs.max(0) as f64) / 86_400.0
        }
        Err(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_long_string() {
        assert_eq!(truncate("hello world", 5), "hello...");
    }

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_multibyte_boundary() {
        // Must not panic on a char boundary inside a multibyte sequence
        let s = "héllo wörld";
        let t = truncate(s, 2);
        assert!(t.ends_with("..."));
    }

    #[test]
    fn test_tail() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 5), "ab");
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape(r#"a<b>&"c""#), "a&lt;b&gt;&amp;&quot;c&quot;");
    }

    #[test]
    fn test_age_days_sqlite_format() {
        assert!(age_days("2000-01-01 00:00:00") > 9000.0);
    }
}
