//! Field-level validators and sanitizers
//!
//! Every function here is pure apart from the warning [`clean_numeric_value`]
//! logs. A failed check never drops a record: callers substitute a default and
//! keep the returned [`ValidationError`] for the run's warning tally.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::warn;

use crate::error::ValidationError;

static EMAIL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").ok());

/// Naive date-time layouts accepted in addition to RFC 3339; read as UTC
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];

/// Date-only layouts; midnight UTC is assumed
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y", "%B %d, %Y"];

/// Check that an email address is well-formed
pub fn validate_email(email: &str) -> bool {
    EMAIL_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(email))
}

/// Parse any accepted date layout into a UTC timestamp
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = raw.trim();
    let invalid = || ValidationError::InvalidDate(raw.to_string());

    if trimmed.is_empty() {
        return Err(invalid());
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc()).ok_or_else(invalid);
        }
    }

    Err(invalid())
}

/// Normalize a date to canonical ISO-8601 (`YYYY-MM-DDTHH:MM:SSZ`)
pub fn validate_date(raw: &str) -> Result<String, ValidationError> {
    parse_date(raw).map(|parsed| parsed.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Check that a URL has an http(s) scheme and a host
pub fn validate_url(raw: &str) -> bool {
    match url::Url::parse(raw.trim()) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().is_some_and(|host| !host.is_empty())
        },
        Err(_) => false,
    }
}

/// Strip a handle down to the characters its platform allows
///
/// A leading `@` is dropped. Returns an empty string when nothing survives.
pub fn validate_social_handle(platform: &str, raw: &str) -> String {
    let allowed: fn(char) -> bool = match platform.trim().to_lowercase().as_str() {
        "instagram" | "tiktok" => |c| c.is_ascii_alphanumeric() || c == '.' || c == '_',
        "twitter" | "x" => |c| c.is_ascii_alphanumeric() || c == '_',
        _ => |c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'),
    };

    raw.trim()
        .trim_start_matches('@')
        .chars()
        .filter(|c| allowed(*c))
        .collect()
}

/// Outcome of coercing a loosely-typed counter
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedNumber {
    /// Non-negative value; 0 when the input could not be used
    pub value: f64,
    /// Set when the input was present but unusable
    pub issue: Option<ValidationError>,
}

impl CleanedNumber {
    fn ok(value: f64) -> Self {
        Self { value, issue: None }
    }

    fn defaulted(issue: ValidationError) -> Self {
        warn!(issue = %issue, "Numeric field defaulted to 0");
        Self {
            value: 0.0,
            issue: Some(issue),
        }
    }
}

/// Coerce numbers and numeric-looking strings to a value `>= 0`
///
/// Thousands separators (`,`, `_`, spaces) are accepted. Absent values
/// (`null`, empty string) are 0 without a warning; anything else that cannot
/// be read as a finite non-negative number is 0 with a warning.
pub fn clean_numeric_value(value: &Value) -> CleanedNumber {
    let number = match value {
        Value::Null => return CleanedNumber::ok(0.0),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let digits: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, ',' | '_' | ' '))
                .collect();
            if digits.is_empty() {
                return CleanedNumber::ok(0.0);
            }
            digits.parse::<f64>().ok().filter(|n| n.is_finite())
        },
        other => {
            return CleanedNumber::defaulted(ValidationError::NotNumeric(other.to_string()));
        },
    };

    match number {
        Some(n) if n < 0.0 => CleanedNumber::defaulted(ValidationError::Negative(n)),
        Some(n) => CleanedNumber::ok(n),
        None => {
            let shown = value.as_str().map_or_else(|| value.to_string(), str::to_string);
            CleanedNumber::defaulted(ValidationError::NotNumeric(shown))
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com"));
        assert!(validate_email("first.last+promo@mail.example.co.uk"));
        assert!(!validate_email("not-an-email"));
        assert!(!validate_email("invalid-email"));
        assert!(!validate_email("user@localhost"));
        assert!(!validate_email(""));
    }

    #[test]
    fn test_validate_date_accepts_known_layouts() {
        assert_eq!(validate_date("2024-01-15T10:30:00Z").unwrap(), "2024-01-15T10:30:00Z");
        assert_eq!(validate_date("2024-01-15T12:30:00+02:00").unwrap(), "2024-01-15T10:30:00Z");
        assert_eq!(validate_date("2024-01-15T10:30:00.250").unwrap(), "2024-01-15T10:30:00Z");
        assert_eq!(validate_date("2024-01-15 10:30:00").unwrap(), "2024-01-15T10:30:00Z");
        assert_eq!(validate_date("2024-01-15").unwrap(), "2024-01-15T00:00:00Z");
        assert_eq!(validate_date("01/15/2024").unwrap(), "2024-01-15T00:00:00Z");
        assert_eq!(validate_date("January 15, 2024").unwrap(), "2024-01-15T00:00:00Z");
    }

    #[test]
    fn test_validate_date_rejects_garbage() {
        assert_eq!(
            validate_date("not-a-date"),
            Err(ValidationError::InvalidDate("not-a-date".to_string()))
        );
        assert!(validate_date("").is_err());
        assert!(validate_date("2024-13-45").is_err());
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://instagram.com/p/abc123"));
        assert!(validate_url("http://tiktok.com/@user/video/1"));
        assert!(!validate_url("broken_link"));
        assert!(!validate_url("ftp://example.com/file"));
        assert!(!validate_url("https://"));
        assert!(!validate_url(""));
    }

    #[test]
    fn test_validate_social_handle() {
        assert_eq!(validate_social_handle("instagram", "@jane.doe_99"), "jane.doe_99");
        assert_eq!(validate_social_handle("TikTok", "@cool-kid!!"), "coolkid");
        assert_eq!(validate_social_handle("twitter", "@a.b_c"), "ab_c");
        assert_eq!(validate_social_handle("youtube", "my-channel"), "my-channel");
        assert_eq!(validate_social_handle("instagram", "#!?"), "");
        assert_eq!(validate_social_handle("instagram", ""), "");
    }

    #[test]
    fn test_clean_numeric_value_coerces_strings() {
        let cleaned = clean_numeric_value(&json!("1,234"));
        assert_eq!(cleaned.value, 1234.0);
        assert!(cleaned.issue.is_none());

        assert_eq!(clean_numeric_value(&json!(" 12 500 ")).value, 12500.0);
        assert_eq!(clean_numeric_value(&json!("99.5")).value, 99.5);
        assert_eq!(clean_numeric_value(&json!(42)).value, 42.0);
    }

    #[test]
    fn test_clean_numeric_value_extreme_magnitudes() {
        let cases = [
            (json!("99999999999999999999"), 1e20, false),
            (json!(u64::MAX), u64::MAX as f64, false),
            (json!(1e308), 1e308, false),
            (json!("1.5e300"), 1.5e300, false),
            (json!("1e400"), 0.0, true),
            (json!("-1e400"), 0.0, true),
            (json!("0.5"), 0.5, false),
        ];

        for (input, expected, has_issue) in cases {
            let cleaned = clean_numeric_value(&input);
            assert_eq!(cleaned.value, expected, "input {}", input);
            assert_eq!(cleaned.issue.is_some(), has_issue, "input {}", input);
            assert!(cleaned.value.is_finite());
        }
    }

    #[test]
    fn test_clean_numeric_value_defaults_with_warning() {
        let cleaned = clean_numeric_value(&json!("abc"));
        assert_eq!(cleaned.value, 0.0);
        assert_eq!(cleaned.issue, Some(ValidationError::NotNumeric("abc".to_string())));

        let nan = clean_numeric_value(&json!("NaN"));
        assert_eq!(nan.value, 0.0);
        assert!(nan.issue.is_some());

        let negative = clean_numeric_value(&json!(-5));
        assert_eq!(negative.value, 0.0);
        assert_eq!(negative.issue, Some(ValidationError::Negative(-5.0)));

        assert!(clean_numeric_value(&json!(true)).issue.is_some());
    }

    #[test]
    fn test_clean_numeric_value_absent_is_silent_zero() {
        assert_eq!(clean_numeric_value(&Value::Null), CleanedNumber::ok(0.0));
        assert_eq!(clean_numeric_value(&json!("")), CleanedNumber::ok(0.0));
    }
}
