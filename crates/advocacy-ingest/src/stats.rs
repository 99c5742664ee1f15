//! Dataset statistics over the normalized rows of a run

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::error::{IngestError, IngestResult, ValidationError};
use crate::models::NormalizedRecord;

/// Mean and median of one column; `None` when there are no rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Distribution {
    pub mean: Option<f64>,
    pub median: Option<f64>,
}

impl Distribution {
    pub fn of(mut values: Vec<f64>) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        values.sort_by(f64::total_cmp);
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 0 {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        } else {
            values[n / 2]
        };

        Self {
            mean: Some(mean),
            median: Some(median),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngagementStats {
    pub likes: Distribution,
    pub comments: Distribution,
    pub shares: Distribution,
    pub reach: Distribution,
}

/// Summary report written beside the staged artifact
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DataStatistics {
    pub total_records: usize,
    pub distinct_users: usize,
    pub valid_emails_percentage: f64,
    /// Share of rows with at least one invalid post URL
    pub invalid_urls_percentage: f64,
    pub platform_distribution: BTreeMap<String, usize>,
    /// Field-level warnings raised per kind across the run
    pub common_issues: BTreeMap<String, usize>,
    pub records_dropped: usize,
    pub engagement_stats: EngagementStats,
    pub sales_stats: Distribution,
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

impl DataStatistics {
    pub fn from_records<'a>(
        records: &[NormalizedRecord],
        warnings: impl IntoIterator<Item = &'a ValidationError>,
        records_dropped: usize,
    ) -> Self {
        let total = records.len();

        let mut platform_distribution = BTreeMap::new();
        for record in records {
            *platform_distribution.entry(record.platform.clone()).or_insert(0) += 1;
        }

        let mut common_issues = BTreeMap::new();
        for warning in warnings {
            *common_issues.entry(warning.kind().to_string()).or_insert(0) += 1;
        }

        let column = |f: fn(&NormalizedRecord) -> f64| Distribution::of(records.iter().map(f).collect());

        Self {
            total_records: total,
            distinct_users: records
                .iter()
                .map(|r| r.user_id.as_str())
                .collect::<std::collections::HashSet<_>>()
                .len(),
            valid_emails_percentage: percentage(records.iter().filter(|r| r.email_valid).count(), total),
            invalid_urls_percentage: percentage(
                records.iter().filter(|r| r.invalid_post_urls > 0).count(),
                total,
            ),
            platform_distribution,
            common_issues,
            records_dropped,
            engagement_stats: EngagementStats {
                likes: column(|r| r.total_likes as f64),
                comments: column(|r| r.total_comments as f64),
                shares: column(|r| r.total_shares as f64),
                reach: column(|r| r.total_reach as f64),
            },
            sales_stats: column(|r| r.total_sales_attributed),
        }
    }

    pub fn write(&self, path: &Path) -> IngestResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json).map_err(|e| IngestError::io(path, e))?;
        info!(
            path = %path.display(),
            records = self.total_records,
            valid_emails_pct = self.valid_emails_percentage,
            "Wrote data statistics"
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(user: &str, platform: &str, likes: i64, email_valid: bool) -> NormalizedRecord {
        NormalizedRecord {
            user_id: user.to_string(),
            name: String::new(),
            email: String::new(),
            email_valid,
            instagram_handle: None,
            tiktok_handle: None,
            platform: platform.to_string(),
            program_id: "p1".to_string(),
            brand: None,
            tasks_completed: 1,
            total_likes: likes,
            total_comments: 0,
            total_shares: 0,
            total_reach: 0,
            total_sales_attributed: likes as f64 / 10.0,
            joined_at: None,
            source_file: "user_1.json".to_string(),
            issues: 0,
            invalid_post_urls: if likes > 50 { 1 } else { 0 },
        }
    }

    #[test]
    fn test_distribution() {
        assert_eq!(Distribution::of(vec![]), Distribution::default());
        let odd = Distribution::of(vec![5.0, 1.0, 3.0]);
        assert_eq!(odd.mean, Some(3.0));
        assert_eq!(odd.median, Some(3.0));
        assert_eq!(Distribution::of(vec![4.0, 1.0, 2.0, 3.0]).median, Some(2.5));
    }

    #[test]
    fn test_statistics_from_records() {
        let records = vec![
            record("u1", "instagram", 10, true),
            record("u1", "tiktok", 20, false),
            record("u2", "tiktok", 90, true),
            record("u3", "youtube", 40, true),
        ];
        let warnings = vec![
            ValidationError::InvalidEmail("nope".into()),
            ValidationError::NotNumeric("abc".into()),
            ValidationError::NotNumeric("xyz".into()),
        ];

        let stats = DataStatistics::from_records(&records, &warnings, 2);
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.distinct_users, 3);
        assert_eq!(stats.valid_emails_percentage, 75.0);
        assert_eq!(stats.invalid_urls_percentage, 25.0);
        assert_eq!(stats.platform_distribution.get("tiktok"), Some(&2));
        assert_eq!(stats.common_issues.get("not_numeric"), Some(&2));
        assert_eq!(stats.records_dropped, 2);
        assert_eq!(stats.engagement_stats.likes.mean, Some(40.0));
        assert_eq!(stats.engagement_stats.likes.median, Some(30.0));
        assert_eq!(stats.sales_stats.mean, Some(4.0));
    }

    #[test]
    fn test_empty_run_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data_statistics.json");
        let stats = DataStatistics::from_records(&[], std::iter::empty(), 0);
        stats.write(&path).unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["total_records"], 0);
        assert!(written["sales_stats"]["mean"].is_null());
    }
}
