//! Transactional batch upload
//!
//! Rows already present under `(user_id, program_id, platform, source_file)`
//! are dropped before batching, so re-running a full import never duplicates.
//! Batches then commit strictly in order; the first failed batch rolls back on
//! its own and stops the upload, leaving earlier batches committed.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{error, info};

use crate::error::{IngestError, IngestResult};
use crate::models::{NormalizedRecord, RecordKey};
use crate::store::DestinationStore;

/// Index range of the batch that rolled back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailedBatch {
    pub batch_index: usize,
    /// First row offset, inclusive
    pub start: usize,
    /// Last row offset, exclusive
    pub end: usize,
}

/// Outcome of an upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub rows_inserted: u64,
    /// Rows skipped because their key already existed
    pub rows_skipped: usize,
    pub batches_committed: usize,
    pub batches_total: usize,
    pub failed_batch: Option<FailedBatch>,
}

/// Upload result, keeping the partial report when a batch fails
#[derive(Debug)]
pub struct UploadOutcome {
    pub report: UploadReport,
    pub error: Option<IngestError>,
}

impl UploadOutcome {
    pub fn into_result(self) -> IngestResult<UploadReport> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.report),
        }
    }
}

/// Writes normalized rows in fixed-size transactional batches
pub struct BatchUploader<'a, S: DestinationStore + ?Sized> {
    store: &'a S,
    batch_size: usize,
}

impl<'a, S: DestinationStore + ?Sized> BatchUploader<'a, S> {
    pub fn new(store: &'a S, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Drop rows whose key is already stored or repeated earlier in `rows`
    pub async fn deduplicate(
        &self,
        rows: Vec<NormalizedRecord>,
    ) -> IngestResult<(Vec<NormalizedRecord>, usize)> {
        let keys: Vec<RecordKey> = rows.iter().map(NormalizedRecord::key).collect();
        let existing = self.store.existing_keys(&keys).await?;

        let total = rows.len();
        let mut seen: HashSet<RecordKey> = HashSet::with_capacity(total);
        let fresh: Vec<NormalizedRecord> = rows
            .into_iter()
            .zip(keys)
            .filter_map(|(row, key)| {
                (!existing.contains(&key) && seen.insert(key)).then_some(row)
            })
            .collect();

        let skipped = total - fresh.len();
        info!(
            total,
            existing = existing.len(),
            skipped,
            "Deduplicated rows against destination"
        );
        Ok((fresh, skipped))
    }

    /// Deduplicate, then commit batch by batch
    pub async fn upload(&self, rows: Vec<NormalizedRecord>) -> UploadOutcome {
        let (fresh, skipped) = match self.deduplicate(rows).await {
            Ok(result) => result,
            Err(e) => {
                return UploadOutcome {
                    report: UploadReport::default(),
                    error: Some(e),
                }
            },
        };

        let mut report = UploadReport {
            rows_skipped: skipped,
            batches_total: fresh.len().div_ceil(self.batch_size),
            ..UploadReport::default()
        };

        if fresh.is_empty() {
            info!("No new rows to upload");
            return UploadOutcome {
                report,
                error: None,
            };
        }

        for (batch_index, batch) in fresh.chunks(self.batch_size).enumerate() {
            let start = batch_index * self.batch_size;
            let end = start + batch.len();

            match self.store.insert_batch(batch).await {
                Ok(inserted) => {
                    report.rows_inserted += inserted;
                    report.batches_committed += 1;
                    info!(
                        "Batch {} / {} committed: rows {}..{} ({} inserted)",
                        batch_index + 1,
                        report.batches_total,
                        start,
                        end,
                        inserted
                    );
                },
                Err(source) => {
                    error!(
                        batch = batch_index,
                        start,
                        end,
                        error = %source,
                        "Batch rolled back, halting upload"
                    );
                    report.failed_batch = Some(FailedBatch {
                        batch_index,
                        start,
                        end,
                    });
                    return UploadOutcome {
                        report,
                        error: Some(IngestError::Transaction {
                            batch_index,
                            start,
                            end,
                            source: Box::new(source),
                        }),
                    };
                },
            }
        }

        info!(
            inserted = report.rows_inserted,
            skipped = report.rows_skipped,
            batches = report.batches_committed,
            "Upload complete"
        );
        UploadOutcome {
            report,
            error: None,
        }
    }
}
