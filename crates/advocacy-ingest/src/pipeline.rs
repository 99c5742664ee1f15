//! Run orchestration
//!
//! A run is strictly sequential: ensure the destination schema, derive the
//! processing state from stored lineage, select files, normalize them in
//! sequence order, stage the artifact, then upload it batch by batch.
//! Recoverable problems are counted in [`RunSummary`]; the first fatal error
//! ends the run and is returned in [`RunOutcome::fatal`].

use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::artifact::{StagedArtifact, StagedSource};
use crate::config::IngestConfig;
use crate::error::{IngestError, IngestResult, ValidationError};
use crate::file_state::{FileStateTracker, ProcessingState, SelectionMode, SourceFile};
use crate::models::NormalizedRecord;
use crate::normalizer::{normalize_document, read_document};
use crate::stats::DataStatistics;
use crate::store::{DestinationStore, DestinationSummary};
use crate::uploader::{BatchUploader, FailedBatch};

/// Counters reported at the end of every run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub files_selected: usize,
    pub files_processed: usize,
    /// Files that could not be read or parsed
    pub files_failed: usize,
    pub rows_normalized: usize,
    pub rows_inserted: u64,
    pub rows_skipped: usize,
    /// Records dropped for a missing `user_id` or `platform`
    pub records_dropped: usize,
    pub warnings: usize,
    pub errors: usize,
    pub batches_committed: usize,
    pub failed_batch: Option<FailedBatch>,
}

impl RunSummary {
    pub fn log(&self) {
        info!(
            files_selected = self.files_selected,
            files_processed = self.files_processed,
            files_failed = self.files_failed,
            rows_normalized = self.rows_normalized,
            rows_inserted = self.rows_inserted,
            rows_skipped = self.rows_skipped,
            records_dropped = self.records_dropped,
            warnings = self.warnings,
            errors = self.errors,
            batches_committed = self.batches_committed,
            "Run summary"
        );
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Files selected:     {}", self.files_selected)?;
        writeln!(f, "Files processed:    {}", self.files_processed)?;
        writeln!(f, "Files failed:       {}", self.files_failed)?;
        writeln!(f, "Rows normalized:    {}", self.rows_normalized)?;
        writeln!(f, "Rows inserted:      {}", self.rows_inserted)?;
        writeln!(f, "Rows skipped:       {}", self.rows_skipped)?;
        writeln!(f, "Records dropped:    {}", self.records_dropped)?;
        writeln!(f, "Warnings:           {}", self.warnings)?;
        writeln!(f, "Errors:             {}", self.errors)?;
        write!(f, "Batches committed:  {}", self.batches_committed)?;
        if let Some(failed) = &self.failed_batch {
            write!(
                f,
                "\nFailed batch:       {} (rows {}..{})",
                failed.batch_index, failed.start, failed.end
            )?;
        }
        Ok(())
    }
}

/// Result of a run: counters plus the fatal error, if any
#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub destination: Option<DestinationSummary>,
    pub fatal: Option<IngestError>,
}

impl RunOutcome {
    fn finish(
        mut summary: RunSummary,
        destination: Option<DestinationSummary>,
        result: IngestResult<()>,
    ) -> Self {
        let fatal = match result {
            Ok(()) => None,
            Err(e) => {
                summary.errors += 1;
                error!(error = %e, "Run aborted");
                Some(e)
            },
        };
        summary.log();
        Self {
            summary,
            destination,
            fatal,
        }
    }

    /// A run that failed before any file was selected, e.g. on connect
    pub fn aborted(error: IngestError) -> Self {
        Self::finish(RunSummary::default(), None, Err(error))
    }

    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
    }

    /// 0 on success, including runs with nothing new; 1 on any fatal error
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Rows of a normalize stage plus the warnings raised building them
#[derive(Debug, Clone)]
pub struct NormalizeOutput {
    pub records: Vec<NormalizedRecord>,
    pub sources: Vec<StagedSource>,
    pub warnings: Vec<ValidationError>,
}

/// Sequential normalize-and-upload pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: IngestConfig,
    tracker: FileStateTracker,
}

impl Pipeline {
    pub fn new(config: IngestConfig) -> IngestResult<Self> {
        config.validate()?;
        let tracker = FileStateTracker::new(&config.input_dir, config.file_pattern()?);
        Ok(Self { config, tracker })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn tracker(&self) -> &FileStateTracker {
        &self.tracker
    }

    /// Derive the processing state from the destination's lineage
    pub async fn processing_state<S>(&self, store: &S) -> IngestResult<ProcessingState>
    where
        S: DestinationStore + ?Sized,
    {
        let stored = store.processed_source_files().await?;
        let state =
            ProcessingState::from_source_files(self.tracker.pattern(), stored.iter().map(String::as_str));
        info!(
            max_processed = ?state.max_processed,
            processed_files = state.processed_files,
            "Derived processing state from destination"
        );
        Ok(state)
    }

    /// Normalize files in order; unreadable files are counted and skipped
    pub fn normalize_files(&self, files: &[SourceFile], summary: &mut RunSummary) -> NormalizeOutput {
        let mut output = NormalizeOutput {
            records: Vec::new(),
            sources: Vec::with_capacity(files.len()),
            warnings: Vec::new(),
        };
        let interval = self.config.progress_interval.max(1);

        for (i, file) in files.iter().enumerate() {
            match read_document(&file.path) {
                Ok(doc) => {
                    let mut normalized = normalize_document(&doc, &file.file_name);
                    debug!(
                        file = %file.file_name,
                        rows = normalized.records.len(),
                        warnings = normalized.warnings.len(),
                        "Normalized file"
                    );
                    summary.files_processed += 1;
                    summary.records_dropped += normalized.skipped.len();
                    output.records.append(&mut normalized.records);
                    output.warnings.append(&mut normalized.warnings);
                    output.sources.push(StagedSource::from_source_file(file));
                },
                Err(e) => {
                    error!(file = %file.file_name, error = %e, "Failed to read source file");
                    summary.files_failed += 1;
                    summary.errors += 1;
                },
            }

            if (i + 1) % interval == 0 {
                info!("Processed {}/{} files", i + 1, files.len());
            }
        }

        summary.rows_normalized = output.records.len();
        summary.warnings += output.warnings.len();
        info!(
            files = summary.files_processed,
            failed = summary.files_failed,
            rows = summary.rows_normalized,
            warnings = output.warnings.len(),
            "Normalization complete"
        );
        output
    }

    /// Write the artifact and the statistics report; returns the artifact
    pub fn stage(
        &self,
        output: NormalizeOutput,
        mode: SelectionMode,
        summary: &RunSummary,
    ) -> IngestResult<StagedArtifact> {
        let statistics =
            DataStatistics::from_records(&output.records, &output.warnings, summary.records_dropped);
        statistics.write(&self.config.stats_path)?;

        let artifact = StagedArtifact::new(mode.to_string(), output.sources, output.records);
        artifact.write(&self.config.artifact_path)?;
        Ok(artifact)
    }

    async fn upload_records<S>(
        &self,
        store: &S,
        records: Vec<NormalizedRecord>,
        summary: &mut RunSummary,
    ) -> IngestResult<()>
    where
        S: DestinationStore + ?Sized,
    {
        let outcome = BatchUploader::new(store, self.config.batch_size)
            .upload(records)
            .await;

        summary.rows_inserted = outcome.report.rows_inserted;
        summary.rows_skipped = outcome.report.rows_skipped;
        summary.batches_committed = outcome.report.batches_committed;
        summary.failed_batch = outcome.report.failed_batch;

        outcome.into_result().map(|_| ())
    }

    async fn destination_summary<S>(&self, store: &S) -> Option<DestinationSummary>
    where
        S: DestinationStore + ?Sized,
    {
        match store.summary().await {
            Ok(destination) => {
                info!(
                    total_rows = destination.total_rows,
                    distinct_users = destination.distinct_users,
                    platforms = ?destination.platforms,
                    "Destination statistics"
                );
                Some(destination)
            },
            Err(e) => {
                warn!(error = %e, "Could not read destination statistics");
                None
            },
        }
    }

    /// Select, normalize and stage without touching the destination
    ///
    /// `state` stands in for the destination's lineage when incremental
    /// selection is requested.
    pub fn normalize_only(&self, mode: SelectionMode, state: &ProcessingState) -> RunOutcome {
        let mut summary = RunSummary::default();
        let result = self.try_normalize(mode, state, &mut summary);
        RunOutcome::finish(summary, None, result)
    }

    fn try_normalize(
        &self,
        mode: SelectionMode,
        state: &ProcessingState,
        summary: &mut RunSummary,
    ) -> IngestResult<()> {
        let files = self.tracker.plan(mode, state)?;
        summary.files_selected = files.len();
        let output = self.normalize_files(&files, summary);
        self.stage(output, mode, summary)?;
        Ok(())
    }

    /// Full run: schema, lineage, selection, normalization, staging, upload
    pub async fn run<S>(&self, store: &S, mode: SelectionMode) -> RunOutcome
    where
        S: DestinationStore + ?Sized,
    {
        info!(mode = %mode, input = %self.config.input_dir.display(), "Starting ingest run");
        let mut summary = RunSummary::default();
        let result = self.try_run(store, mode, &mut summary).await;
        let destination = match result {
            Ok(()) => self.destination_summary(store).await,
            Err(_) => None,
        };
        RunOutcome::finish(summary, destination, result)
    }

    async fn try_run<S>(&self, store: &S, mode: SelectionMode, summary: &mut RunSummary) -> IngestResult<()>
    where
        S: DestinationStore + ?Sized,
    {
        store.ensure_schema().await?;

        let state = match mode {
            SelectionMode::Incremental => self.processing_state(store).await?,
            SelectionMode::Full | SelectionMode::Range { .. } => ProcessingState::default(),
        };

        let files = self.tracker.plan(mode, &state)?;
        summary.files_selected = files.len();
        if files.is_empty() {
            info!("No new files to process");
            return Ok(());
        }

        let output = self.normalize_files(&files, summary);
        self.stage(output, mode, summary)?;

        // The uploader consumes the staged artifact, not the in-memory rows
        let artifact = StagedArtifact::read(&self.config.artifact_path)?;
        self.upload_records(store, artifact.records, summary).await
    }

    /// Upload a previously staged artifact
    pub async fn upload_artifact<S>(&self, store: &S) -> RunOutcome
    where
        S: DestinationStore + ?Sized,
    {
        let mut summary = RunSummary::default();
        let result = self.try_upload_artifact(store, &mut summary).await;
        let destination = match result {
            Ok(()) => self.destination_summary(store).await,
            Err(_) => None,
        };
        RunOutcome::finish(summary, destination, result)
    }

    async fn try_upload_artifact<S>(&self, store: &S, summary: &mut RunSummary) -> IngestResult<()>
    where
        S: DestinationStore + ?Sized,
    {
        let artifact = StagedArtifact::read(&self.config.artifact_path)?;
        summary.rows_normalized = artifact.records.len();
        let changed = artifact.changed_sources(&self.config.input_dir);
        if changed > 0 {
            summary.warnings += changed;
            warn!(changed, "Uploading rows staged from files that have since changed");
        }
        store.ensure_schema().await?;
        self.upload_records(store, artifact.records, summary).await
    }
}
