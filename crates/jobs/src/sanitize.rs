//! Redaction and truncation for any text that ends up in a job record or on
//! the wire (progress lines, error messages, input previews).

use std::sync::LazyLock;

use regex_lite::{Captures, Regex};

/// Default cap on sanitized message length, in characters.
pub const DEFAULT_MAX_LEN: usize = 120;

const ELLIPSIS: &str = "...";

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid email regex")
});

static BEARER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]+").expect("valid bearer regex")
});

static JWT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9_-]{20,}\.[A-Za-z0-9_-]{10,}\.[A-Za-z0-9_-]{10,}")
        .expect("valid jwt regex")
});

static LONG_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_-]{24,}").expect("valid token regex"));

/// A run of 6+ digits, together with any word characters glued to it
/// (`acct_123456789012`, `id123456789012`, `123456789012x`).
static LONG_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9_]*\d{6,}[A-Za-z0-9_]*").expect("valid number regex")
});

/// Strips secrets and personal data from free text and bounds its length.
#[derive(Debug, Clone, Copy)]
pub struct Sanitizer {
    max_len: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEN)
    }
}

impl Sanitizer {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn sanitize(&self, raw: &str) -> String {
        let text = EMAIL.replace_all(raw.trim(), "[redacted-email]");
        let text = BEARER.replace_all(&text, "Bearer [redacted-token]");
        let text = JWT.replace_all(&text, "[redacted-token]");
        // Plain words can be long too; only runs that mix in digits look like keys.
        let text = LONG_TOKEN.replace_all(&text, |caps: &Captures<'_>| {
            let run = &caps[0];
            if run.bytes().any(|b| b.is_ascii_digit()) {
                "[redacted-token]".to_string()
            } else {
                run.to_string()
            }
        });
        let text = LONG_NUMBER.replace_all(&text, "[redacted-number]");
        self.truncate(&text)
    }

    fn truncate(&self, text: &str) -> String {
        if text.chars().count() <= self.max_len {
            return text.to_string();
        }
        if self.max_len <= ELLIPSIS.len() {
            return text.chars().take(self.max_len).collect();
        }
        let mut out: String = text.chars().take(self.max_len - ELLIPSIS.len()).collect();
        out.push_str(ELLIPSIS);
        out
    }
}
