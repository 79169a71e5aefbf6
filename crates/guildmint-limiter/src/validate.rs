//! Input validation and display sanitation.
//!
//! Handlers run every piece of user-supplied text through these before it
//! reaches state or goes back out in a message. Failures surface as
//! [`MintError::InvalidInput`] with the specific constraint violated.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use guildmint_core::MintError;

// ── String kinds and their length caps ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringKind {
    Username,
    Reason,
    Message,
    Url,
    CommandInput,
    SearchQuery,
    Default,
}

impl StringKind {
    pub fn max_len(self) -> usize {
        match self {
            StringKind::Username => 100,
            StringKind::Reason => 500,
            StringKind::Message => 2_000,
            StringKind::Url => 2_000,
            StringKind::CommandInput => 500,
            StringKind::SearchQuery => 200,
            StringKind::Default => 1_000,
        }
    }
}

// ── Dangerous patterns ───────────────────────────────────────────────────────

static DANGEROUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)<script.*?>.*?</script>",
        r"(?i)javascript:",
        r"(?i)on\w+\s*=",
        r"(?i)eval\s*\(",
        r"(?i)exec\s*\(",
        r"(?i)__import__",
        r"(?i)import\s*\(",
        r"(?i);\s*drop\s+",
        r"(?i);\s*delete\s+",
        r"(?i);\s*update\s+",
        r"(?i);\s*insert\s+",
        r"(?i)union\s+select",
        r"'--",
        r"(?i)'\s*or\s*'",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("dangerous pattern regex"))
    .collect()
});

static SNOWFLAKE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{17,20}$").expect("snowflake regex"));

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^https?://[^\s<>"{}|\\^`\[\]]+$"#).expect("url regex"));

/// True when `value` matches any injection-shaped pattern.
pub fn contains_dangerous_pattern(value: &str) -> bool {
    DANGEROUS_PATTERNS.iter().any(|re| {
        if re.is_match(value) {
            warn!(pattern = %re.as_str(), "dangerous input rejected");
            true
        } else {
            false
        }
    })
}

// ── Validators ───────────────────────────────────────────────────────────────

/// Validate free-form text: trimmed, bounded per kind, free of dangerous
/// patterns. Returns the cleaned value.
pub fn validate_string(
    value: &str,
    kind: StringKind,
    allow_empty: bool,
) -> Result<String, MintError> {
    let cleaned = value.trim();

    if cleaned.is_empty() && !allow_empty {
        return Err(MintError::InvalidInput("value must not be empty".into()));
    }
    let max = kind.max_len();
    if cleaned.chars().count() > max {
        return Err(MintError::InvalidInput(format!(
            "value exceeds the {max}-character limit"
        )));
    }
    if contains_dangerous_pattern(cleaned) {
        return Err(MintError::InvalidInput(
            "potentially dangerous input detected".into(),
        ));
    }
    Ok(cleaned.to_string())
}

/// Parse and bound an integer.
pub fn validate_integer(
    value: &str,
    min: Option<i64>,
    max: Option<i64>,
) -> Result<i64, MintError> {
    let parsed: i64 = value
        .trim()
        .parse()
        .map_err(|_| MintError::InvalidInput("value must be an integer".into()))?;
    if let Some(min) = min {
        if parsed < min {
            return Err(MintError::InvalidInput(format!("value must be at least {min}")));
        }
    }
    if let Some(max) = max {
        if parsed > max {
            return Err(MintError::InvalidInput(format!("value must be at most {max}")));
        }
    }
    Ok(parsed)
}

/// Validate a platform snowflake: 17–20 ASCII digits.
pub fn validate_snowflake(value: &str) -> Result<String, MintError> {
    let cleaned = value.trim();
    if SNOWFLAKE_RE.is_match(cleaned) {
        Ok(cleaned.to_string())
    } else {
        Err(MintError::InvalidInput("invalid snowflake id".into()))
    }
}

/// Validate a URL: http/https only, bounded length, no script schemes.
pub fn validate_url(value: &str) -> Result<String, MintError> {
    let cleaned = value.trim();
    if cleaned.chars().count() > StringKind::Url.max_len() {
        return Err(MintError::InvalidInput("url too long".into()));
    }
    if !URL_RE.is_match(cleaned) {
        return Err(MintError::InvalidInput("invalid url".into()));
    }
    let lowered = cleaned.to_ascii_lowercase();
    for scheme in ["javascript:", "data:", "vbscript:"] {
        if lowered.contains(scheme) {
            return Err(MintError::InvalidInput("invalid url scheme".into()));
        }
    }
    Ok(cleaned.to_string())
}

/// Escape chat-platform formatting characters and strip zero-width code
/// points so user text cannot break out of an embed.
pub fn sanitize_for_display(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            // Zero-width characters are dropped entirely.
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => {}
            '*' | '_' | '`' | '~' | '|' | '>' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_length_caps_per_kind() {
        let long = "x".repeat(501);
        assert!(validate_string(&long, StringKind::Reason, false).is_err());
        assert!(validate_string(&long, StringKind::Message, false).is_ok());
        let very_long = "x".repeat(2_001);
        assert!(validate_string(&very_long, StringKind::Message, false).is_err());
    }

    #[test]
    fn empty_strings() {
        assert!(validate_string("   ", StringKind::Default, false).is_err());
        assert_eq!(validate_string("  ", StringKind::Default, true).unwrap(), "");
    }

    #[test]
    fn rejects_injection_shapes() {
        for bad in [
            "<script>alert(1)</script>",
            "hello; DROP TABLE users",
            "1 UNION SELECT password",
            "x' OR 'a",
            "admin'--",
            "onload= pwn",
            "eval (code)",
        ] {
            assert!(
                validate_string(bad, StringKind::Default, false).is_err(),
                "should reject {bad:?}"
            );
        }
    }

    #[test]
    fn accepts_ordinary_text() {
        let ok = validate_string("  just a normal reason!  ", StringKind::Reason, false).unwrap();
        assert_eq!(ok, "just a normal reason!");
    }

    #[test]
    fn integer_bounds() {
        assert_eq!(validate_integer("42", Some(10), Some(100)).unwrap(), 42);
        assert!(validate_integer("9", Some(10), None).is_err());
        assert!(validate_integer("101", None, Some(100)).is_err());
        assert!(validate_integer("abc", None, None).is_err());
    }

    #[test]
    fn snowflake_shape() {
        assert!(validate_snowflake("12345678901234567").is_ok());
        assert!(validate_snowflake("12345678901234567890").is_ok());
        assert!(validate_snowflake("1234567890123456").is_err());
        assert!(validate_snowflake("123456789012345678901").is_err());
        assert!(validate_snowflake("1234567890123456a").is_err());
    }

    #[test]
    fn url_schemes() {
        assert!(validate_url("https://example.com/page?q=1").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("javascript:alert(1)").is_err());
        assert!(validate_url("https://example.com/javascript:x").is_err());
    }

    #[test]
    fn display_sanitation() {
        assert_eq!(sanitize_for_display("*bold* _it_"), "\\*bold\\* \\_it\\_");
        assert_eq!(sanitize_for_display("a\u{200B}b\u{FEFF}c"), "abc");
    }
}
