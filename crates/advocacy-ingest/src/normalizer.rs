//! Flattening of raw advocate documents into aggregated rows
//!
//! Tasks are grouped by `(program_id, platform)` in order of first
//! appearance. Each group becomes one [`NormalizedRecord`] whose totals are
//! the sums over the group's tasks; groups without tasks never exist, so a
//! program with no completed tasks contributes no row.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{IngestError, IngestResult, RecordSkipError, ValidationError};
use crate::models::{value_as_text, NormalizedRecord, RawTask, RawUserDocument};
use crate::validation::{
    clean_numeric_value, parse_date, validate_email, validate_social_handle, validate_url,
};

/// Rows produced from one source file plus everything that went wrong on the way
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NormalizedDocument {
    pub records: Vec<NormalizedRecord>,
    pub warnings: Vec<ValidationError>,
    pub skipped: Vec<RecordSkipError>,
}

/// Read and parse one source file
pub fn read_document(path: &Path) -> IngestResult<RawUserDocument> {
    let content = std::fs::read_to_string(path).map_err(|e| IngestError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

/// Validated user-level fields copied onto every row of a document
struct Identity {
    name: String,
    email: String,
    email_valid: bool,
    instagram_handle: Option<String>,
    tiktok_handle: Option<String>,
    joined_at: Option<DateTime<Utc>>,
}

impl Identity {
    fn from_document(doc: &RawUserDocument, warnings: &mut Vec<ValidationError>) -> Self {
        let name = match &doc.name {
            Value::String(s) => s.trim().to_string(),
            Value::Null => String::new(),
            _ => {
                warnings.push(ValidationError::WrongType {
                    field: "name",
                    expected: "string",
                });
                String::new()
            },
        };

        let email = match &doc.email {
            Value::String(s) => s.trim().to_string(),
            Value::Null => String::new(),
            _ => {
                warnings.push(ValidationError::WrongType {
                    field: "email",
                    expected: "string",
                });
                String::new()
            },
        };
        let email_valid = validate_email(&email);
        if !email_valid && !email.is_empty() {
            warnings.push(ValidationError::InvalidEmail(email.clone()));
        }

        let joined_at = match &doc.joined_at {
            Value::String(s) if !s.trim().is_empty() => match parse_date(s) {
                Ok(parsed) => Some(parsed),
                Err(issue) => {
                    warnings.push(issue);
                    None
                },
            },
            Value::String(_) | Value::Null => None,
            _ => {
                warnings.push(ValidationError::WrongType {
                    field: "joined_at",
                    expected: "date string",
                });
                None
            },
        };

        Self {
            name,
            email,
            email_valid,
            instagram_handle: sanitize_handle("instagram", &doc.instagram_handle, warnings),
            tiktok_handle: sanitize_handle("tiktok", &doc.tiktok_handle, warnings),
            joined_at,
        }
    }
}

fn sanitize_handle(
    platform: &str,
    raw: &Value,
    warnings: &mut Vec<ValidationError>,
) -> Option<String> {
    match raw {
        Value::String(s) if !s.trim().is_empty() => {
            let handle = validate_social_handle(platform, s);
            if handle.is_empty() {
                warnings.push(ValidationError::InvalidHandle {
                    platform: platform.to_string(),
                    raw: s.clone(),
                });
                None
            } else {
                Some(handle)
            }
        },
        Value::String(_) | Value::Null => None,
        _ => {
            warnings.push(ValidationError::WrongType {
                field: "social handle",
                expected: "string",
            });
            None
        },
    }
}

/// Running totals for one `(program_id, platform)` group
///
/// Counters are summed unrounded and converted once the group is complete.
#[derive(Default)]
struct Group {
    program_id: String,
    platform: String,
    brand: Option<String>,
    tasks: i32,
    likes: f64,
    comments: f64,
    shares: f64,
    reach: f64,
    sales: f64,
    issues: i32,
    invalid_post_urls: i32,
}

/// Platform tag of a task; `None` when the mandatory tag is absent
fn task_platform(task: &RawTask, issues: &mut Vec<ValidationError>) -> Option<String> {
    match &task.platform {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_lowercase()),
        Value::Number(n) => {
            issues.push(ValidationError::WrongType {
                field: "platform",
                expected: "string",
            });
            Some(n.to_string())
        },
        _ => None,
    }
}

/// Round a summed counter and clamp it into the `BIGINT` column range
fn total_count(sum: f64, field: &'static str, issues: &mut Vec<ValidationError>) -> i64 {
    let rounded = sum.round();
    // `i64::MAX as f64` is 2^63, one past the largest i64
    if rounded.is_finite() && rounded < i64::MAX as f64 {
        rounded as i64
    } else {
        issues.push(ValidationError::OutOfRange { field, value: sum });
        i64::MAX
    }
}

/// Keep summed sales finite so the row survives a JSON round trip
fn total_sales(sum: f64, issues: &mut Vec<ValidationError>) -> f64 {
    if sum.is_finite() {
        sum
    } else {
        issues.push(ValidationError::OutOfRange {
            field: "total_sales_attributed",
            value: sum,
        });
        f64::MAX
    }
}

/// Flatten one document into aggregated rows stamped with `source_file`
pub fn normalize_document(doc: &RawUserDocument, source_file: &str) -> NormalizedDocument {
    let mut out = NormalizedDocument::default();

    let Some(user_id) = value_as_text(&doc.user_id) else {
        let skip = RecordSkipError {
            source_file: source_file.to_string(),
            missing: "user_id",
        };
        warn!(file = %source_file, "{}", skip);
        out.skipped.push(skip);
        return out;
    };

    let mut identity_issues = Vec::new();
    let identity = Identity::from_document(doc, &mut identity_issues);

    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();

    for program in &doc.advocacy_programs {
        let program_id = value_as_text(&program.program_id).unwrap_or_else(|| {
            out.warnings.push(ValidationError::Missing("program_id"));
            String::new()
        });
        let brand = value_as_text(&program.brand);

        // Program-wide sales land on the group that receives the program's first task
        let program_sales = clean_numeric_value(&program.total_sales_attributed);
        let mut pending_sales = Some(program_sales);

        for task in &program.tasks_completed {
            let mut issues = Vec::new();

            let Some(platform) = task_platform(task, &mut issues) else {
                let skip = RecordSkipError {
                    source_file: source_file.to_string(),
                    missing: "platform",
                };
                debug!(file = %source_file, program = %program_id, "{}", skip);
                out.skipped.push(skip);
                continue;
            };

            let mut invalid_post_urls = 0;
            if let Some(post_url) = task.post_url.as_str().filter(|u| !u.trim().is_empty()) {
                if !validate_url(post_url) {
                    issues.push(ValidationError::InvalidUrl(post_url.to_string()));
                    invalid_post_urls = 1;
                }
            }

            let likes = clean_numeric_value(&task.likes);
            let comments = clean_numeric_value(&task.comments);
            let shares = clean_numeric_value(&task.shares);
            let reach = clean_numeric_value(&task.reach);
            let task_sales = clean_numeric_value(&task.sales_attributed);

            let slot = *index
                .entry((program_id.clone(), platform.clone()))
                .or_insert_with(|| {
                    groups.push(Group {
                        program_id: program_id.clone(),
                        platform,
                        ..Group::default()
                    });
                    groups.len() - 1
                });
            let group = &mut groups[slot];

            if group.brand.is_none() {
                group.brand.clone_from(&brand);
            }
            group.tasks = group.tasks.saturating_add(1);
            group.likes += likes.value;
            group.comments += comments.value;
            group.shares += shares.value;
            group.reach += reach.value;
            group.sales += task_sales.value;
            if let Some(sales) = pending_sales.take() {
                group.sales += sales.value;
                issues.extend(sales.issue);
            }

            issues.extend(
                [likes, comments, shares, reach, task_sales]
                    .into_iter()
                    .filter_map(|cleaned| cleaned.issue),
            );
            group.issues += issues.len() as i32;
            group.invalid_post_urls += invalid_post_urls;
            out.warnings.append(&mut issues);
        }

        if let Some(unattributed) = pending_sales.filter(|sales| sales.value > 0.0) {
            debug!(
                file = %source_file,
                program = %program_id,
                sales = unattributed.value,
                "Program has no usable tasks, sales not attributed"
            );
        }
    }

    let shared_issues = identity_issues.len() as i32;
    for group in groups {
        let mut issues = Vec::new();
        let total_likes = total_count(group.likes, "total_likes", &mut issues);
        let total_comments = total_count(group.comments, "total_comments", &mut issues);
        let total_shares = total_count(group.shares, "total_shares", &mut issues);
        let total_reach = total_count(group.reach, "total_reach", &mut issues);
        let total_sales_attributed = total_sales(group.sales, &mut issues);

        out.records.push(NormalizedRecord {
            user_id: user_id.clone(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            email_valid: identity.email_valid,
            instagram_handle: identity.instagram_handle.clone(),
            tiktok_handle: identity.tiktok_handle.clone(),
            platform: group.platform,
            program_id: group.program_id,
            brand: group.brand,
            tasks_completed: group.tasks,
            total_likes,
            total_comments,
            total_shares,
            total_reach,
            total_sales_attributed,
            joined_at: identity.joined_at,
            source_file: source_file.to_string(),
            issues: group.issues + shared_issues + issues.len() as i32,
            invalid_post_urls: group.invalid_post_urls,
        });
        out.warnings.append(&mut issues);
    }

    let mut warnings = identity_issues;
    warnings.append(&mut out.warnings);
    out.warnings = warnings;

    if !out.warnings.is_empty() {
        let mut kinds: Vec<String> = out.warnings.iter().map(ToString::to_string).collect();
        kinds.sort();
        kinds.dedup();
        warn!(
            file = %source_file,
            warnings = out.warnings.len(),
            "Validation issues: {}",
            kinds.join(", ")
        );
    }

    out
}
