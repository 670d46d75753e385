//! Secret redaction for error text and prompt previews.
//!
//! Redaction is a pure function over an explicit pattern table: [`redact_with`] takes the table,
//! [`redact`] applies the built-in one. Patterns run in table order, so specific prefixes
//! (`sk-ant-`, `sk-proj-`) must precede generic ones (`sk-`). The placeholder never matches any
//! pattern, which makes already-redacted text a fixed point.
//!
//! Marker words are preserved: `Bearer <token>` becomes `Bearer [REDACTED]` and
//! `password=<value>` becomes `password=[REDACTED]`.

use lazy_static::lazy_static;
use regex::{NoExpand, Regex};

pub const REDACTED: &str = "[REDACTED]";

/// One named secret pattern.
///
/// With `keep_prefix`, capture group 1 is retained and only the remainder of the match is
/// replaced (used for `Bearer` and `key=value` forms).
#[derive(Debug, Clone)]
pub struct SecretPattern {
    pub name: &'static str,
    pub regex: Regex,
    pub keep_prefix: bool,
}

impl SecretPattern {
    pub fn new(name: &'static str, pattern: &str, keep_prefix: bool) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            regex: Regex::new(pattern)?,
            keep_prefix,
        })
    }

    fn apply(&self, text: &str) -> String {
        if self.keep_prefix {
            self.regex
                .replace_all(text, format!("${{1}}{REDACTED}").as_str())
                .into_owned()
        } else {
            self.regex.replace_all(text, NoExpand(REDACTED)).into_owned()
        }
    }
}

const BUILTIN_TABLE: &[(&str, &str, bool)] = &[
    ("anthropic_key", r"\bsk-ant-[A-Za-z0-9_-]{20,}", false),
    ("openai_project_key", r"\bsk-proj-[A-Za-z0-9_-]{20,}", false),
    ("openai_key", r"\bsk-[A-Za-z0-9]{20,}", false),
    ("anthropic_legacy_key", r"\banthropic-[A-Za-z0-9]{32,}", false),
    ("github_token", r"\bgh[pousr]_[A-Za-z0-9]{36,}", false),
    ("gitlab_token", r"\bglpat-[A-Za-z0-9_-]{20,}", false),
    ("google_api_key", r"\bAIza[0-9A-Za-z_-]{35}", false),
    ("aws_access_key", r"\bAKIA[0-9A-Z]{16}\b", false),
    ("bearer_token", r"(?i)(\bbearer\s+)[A-Za-z0-9\-._~+/]{8,}=*", true),
    (
        "keyed_secret",
        r#"(?i)(\b(?:api[_-]?key|access[_-]?token|auth[_-]?token|aws_secret_access_key|token|secret|password|passwd)\s*[:=]\s*["']?)[^\s"'\[\]]{8,}"#,
        true,
    ),
];

lazy_static! {
    static ref BUILTIN: Vec<SecretPattern> = BUILTIN_TABLE
        .iter()
        .map(|(name, pattern, keep)| SecretPattern::new(name, pattern, *keep).unwrap())
        .collect();
}

/// The built-in pattern table.
pub fn builtin_patterns() -> &'static [SecretPattern] {
    &BUILTIN
}

/// Redacts every match of `patterns` in `text`; text without matches is returned unchanged.
pub fn redact_with(patterns: &[SecretPattern], text: &str) -> String {
    let mut out = text.to_string();
    for pattern in patterns {
        if pattern.regex.is_match(&out) {
            out = pattern.apply(&out);
        }
    }
    out
}

/// Redacts `text` with the built-in table.
pub fn redact(text: &str) -> String {
    redact_with(builtin_patterns(), text)
}

/// Number of secrets `patterns` would replace in `text`.
pub fn count_secrets(patterns: &[SecretPattern], text: &str) -> usize {
    let before = text.matches(REDACTED).count();
    redact_with(patterns, text)
        .matches(REDACTED)
        .count()
        .saturating_sub(before)
}

pub fn has_secrets(text: &str) -> bool {
    builtin_patterns().iter().any(|p| p.regex.is_match(text))
}
