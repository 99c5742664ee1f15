//! Input and output shapes of the pipeline
//!
//! Raw documents are read through loose [`serde_json::Value`] fields so that a
//! wrongly-typed value degrades one field instead of failing the whole file.
//! [`NormalizedRecord`] is the fully-typed row stored in the destination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One advocate's activity file, as produced upstream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUserDocument {
    #[serde(default)]
    pub user_id: Value,
    #[serde(default)]
    pub name: Value,
    #[serde(default)]
    pub email: Value,
    #[serde(default)]
    pub instagram_handle: Value,
    #[serde(default)]
    pub tiktok_handle: Value,
    #[serde(default)]
    pub joined_at: Value,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub advocacy_programs: Vec<RawProgram>,
}

/// Program membership with its completed tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProgram {
    #[serde(default)]
    pub program_id: Value,
    #[serde(default)]
    pub brand: Value,
    /// Program-wide sales figure
    #[serde(default)]
    pub total_sales_attributed: Value,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tasks_completed: Vec<RawTask>,
}

/// A single completed task with raw engagement counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTask {
    #[serde(default)]
    pub task_id: Value,
    #[serde(default)]
    pub platform: Value,
    #[serde(default)]
    pub post_url: Value,
    #[serde(default)]
    pub likes: Value,
    #[serde(default)]
    pub comments: Value,
    #[serde(default)]
    pub shares: Value,
    #[serde(default)]
    pub reach: Value,
    /// Per-task sales figure, when the tracker reports one
    #[serde(default)]
    pub sales_attributed: Value,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Render an identifier-like value as text
///
/// Strings are trimmed; numbers use their decimal form. Anything else,
/// including blank strings, yields `None`.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        },
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One aggregated row per `(user_id, program_id, platform)` within a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub user_id: String,
    pub name: String,
    pub email: String,
    /// False when `email` failed the well-formedness check
    pub email_valid: bool,
    pub instagram_handle: Option<String>,
    pub tiktok_handle: Option<String>,
    pub platform: String,
    pub program_id: String,
    pub brand: Option<String>,
    pub tasks_completed: i32,
    pub total_likes: i64,
    pub total_comments: i64,
    pub total_shares: i64,
    pub total_reach: i64,
    pub total_sales_attributed: f64,
    pub joined_at: Option<DateTime<Utc>>,
    pub source_file: String,
    /// Field-level validation warnings raised while building this row
    #[serde(default)]
    pub issues: i32,
    #[serde(default)]
    pub invalid_post_urls: i32,
}

impl NormalizedRecord {
    /// Composite key used to skip rows the destination already holds
    pub fn key(&self) -> RecordKey {
        RecordKey {
            user_id: self.user_id.clone(),
            program_id: self.program_id.clone(),
            platform: self.platform.clone(),
            source_file: self.source_file.clone(),
        }
    }

    /// Sum of likes, comments and shares
    pub fn total_engagement(&self) -> i64 {
        self.total_likes
            .saturating_add(self.total_comments)
            .saturating_add(self.total_shares)
    }
}

/// `(user_id, program_id, platform, source_file)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub user_id: String,
    pub program_id: String,
    pub platform: String,
    pub source_file: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_document_tolerates_missing_and_null_fields() {
        let doc: RawUserDocument = serde_json::from_value(json!({
            "user_id": 17,
            "advocacy_programs": [{ "program_id": "p1", "tasks_completed": null }]
        }))
        .unwrap();

        assert_eq!(doc.user_id, json!(17));
        assert_eq!(doc.email, Value::Null);
        assert_eq!(doc.advocacy_programs.len(), 1);
        assert!(doc.advocacy_programs[0].tasks_completed.is_empty());

        let empty: RawUserDocument =
            serde_json::from_value(json!({ "advocacy_programs": null })).unwrap();
        assert!(empty.advocacy_programs.is_empty());
    }

    #[test]
    fn test_value_as_text() {
        assert_eq!(value_as_text(&json!("  abc ")), Some("abc".to_string()));
        assert_eq!(value_as_text(&json!(42)), Some("42".to_string()));
        assert_eq!(value_as_text(&json!("   ")), None);
        assert_eq!(value_as_text(&json!(null)), None);
        assert_eq!(value_as_text(&json!(["x"])), None);
    }
}
