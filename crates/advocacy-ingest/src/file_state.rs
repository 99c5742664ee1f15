//! Selection of the source files a run should process
//!
//! There is no persisted cursor. The processing delta is derived on every run
//! from the destination's own `source_file` lineage and the current directory
//! listing, so a partially failed run heals itself on the next attempt.

use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{IngestError, IngestResult};

/// Default file name prefix before the sequence index
pub const DEFAULT_FILE_PREFIX: &str = "user_";

/// Default file extension
pub const DEFAULT_FILE_EXTENSION: &str = "json";

/// How a run chooses its files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Every file in the directory
    Full,
    /// Files from the highest sequence index already stored onwards
    ///
    /// The boundary file itself is selected again: a rolled-back batch can
    /// leave it partly stored, and deduplication skips the rows that made it.
    #[default]
    Incremental,
    /// Files with `start <= sequence < end`, regardless of destination state
    Range { start: u64, end: u64 },
}

impl std::fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionMode::Full => write!(f, "full"),
            SelectionMode::Incremental => write!(f, "incremental"),
            SelectionMode::Range { start, end } => write!(f, "range [{}, {})", start, end),
        }
    }
}

/// `<prefix><n>.<ext>` file naming, e.g. `user_42.json`
#[derive(Debug, Clone)]
pub struct FilePattern {
    pattern: Regex,
}

impl FilePattern {
    pub fn new(prefix: &str, extension: &str) -> IngestResult<Self> {
        let source = format!(
            r"^{}(\d+)\.{}$",
            regex::escape(prefix),
            regex::escape(extension.trim_start_matches('.'))
        );
        let pattern = Regex::new(&source)
            .map_err(|e| IngestError::config(format!("invalid file pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    /// Sequence index encoded in a file name
    pub fn sequence_of(&self, file_name: &str) -> Option<u64> {
        self.pattern
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .and_then(|index| index.as_str().parse().ok())
    }
}

/// A source document and its position in the sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_name: String,
    pub sequence: u64,
}

/// Lineage derived from the destination's `source_file` column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingState {
    /// Highest sequence index present in the destination
    pub max_processed: Option<u64>,
    /// Distinct stored file names that matched the pattern
    pub processed_files: usize,
}

impl ProcessingState {
    /// Derive the state from distinct stored `source_file` values
    pub fn from_source_files<'a>(
        pattern: &FilePattern,
        source_files: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        source_files
            .into_iter()
            .filter_map(|name| pattern.sequence_of(name))
            .fold(Self::default(), |state, sequence| Self {
                max_processed: Some(state.max_processed.map_or(sequence, |max| max.max(sequence))),
                processed_files: state.processed_files + 1,
            })
    }
}

/// Decides which files are new given the destination state and run mode
#[derive(Debug, Clone)]
pub struct FileStateTracker {
    input_dir: PathBuf,
    pattern: FilePattern,
}

impl FileStateTracker {
    pub fn new(input_dir: impl Into<PathBuf>, pattern: FilePattern) -> Self {
        Self {
            input_dir: input_dir.into(),
            pattern,
        }
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn pattern(&self) -> &FilePattern {
        &self.pattern
    }

    /// List matching files ordered by sequence index, then name
    ///
    /// Duplicate indices (`user_5.json`, `user_05.json`) and gaps are kept.
    pub fn scan(&self) -> IngestResult<Vec<SourceFile>> {
        if !self.input_dir.is_dir() {
            return Err(IngestError::config(format!(
                "input directory {} does not exist",
                self.input_dir.display()
            )));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.input_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.input_dir).to_path_buf();
                IngestError::io(&path, std::io::Error::other(e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy().into_owned();
            match self.pattern.sequence_of(&file_name) {
                Some(sequence) => files.push(SourceFile {
                    path: entry.into_path(),
                    file_name,
                    sequence,
                }),
                None => debug!(file = %file_name, "Ignoring file outside the naming pattern"),
            }
        }

        files.sort_by(|a, b| {
            a.sequence
                .cmp(&b.sequence)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        Ok(files)
    }

    /// Pick the files for this run out of a scanned listing
    pub fn select(
        &self,
        files: Vec<SourceFile>,
        mode: SelectionMode,
        state: &ProcessingState,
    ) -> Vec<SourceFile> {
        let selected: Vec<SourceFile> = match mode {
            SelectionMode::Full => files,
            SelectionMode::Incremental => match state.max_processed {
                Some(max) => files.into_iter().filter(|f| f.sequence >= max).collect(),
                None => files,
            },
            SelectionMode::Range { start, end } => files
                .into_iter()
                .filter(|f| f.sequence >= start && f.sequence < end)
                .collect(),
        };

        info!(
            mode = %mode,
            max_processed = ?state.max_processed,
            selected = selected.len(),
            "Selected source files"
        );
        selected
    }

    /// Files no row in the destination refers to yet, up to the boundary
    pub fn pending(&self, state: &ProcessingState) -> IngestResult<Vec<SourceFile>> {
        let files = self.scan()?;
        Ok(files
            .into_iter()
            .filter(|f| state.max_processed.is_none_or(|max| f.sequence > max))
            .collect())
    }

    /// Scan and select in one step
    pub fn plan(&self, mode: SelectionMode, state: &ProcessingState) -> IngestResult<Vec<SourceFile>> {
        let files = self.scan()?;
        Ok(self.select(files, mode, state))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn dir_with(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        dir
    }

    fn user_pattern() -> FilePattern {
        FilePattern::new(DEFAULT_FILE_PREFIX, DEFAULT_FILE_EXTENSION).unwrap()
    }

    fn sequences(files: &[SourceFile]) -> Vec<u64> {
        files.iter().map(|f| f.sequence).collect()
    }

    #[test]
    fn test_pattern_extracts_sequence() {
        let pattern = FilePattern::new("user_", ".json").unwrap();
        assert_eq!(pattern.sequence_of("user_0.json"), Some(0));
        assert_eq!(pattern.sequence_of("user_125.json"), Some(125));
        assert_eq!(pattern.sequence_of("user_x.json"), None);
        assert_eq!(pattern.sequence_of("user_1.json.bak"), None);
        assert_eq!(pattern.sequence_of("other_1.json"), None);
        assert_eq!(user_pattern().sequence_of("user_7.json"), Some(7));
    }

    #[test]
    fn test_scan_orders_numerically_and_keeps_ties() {
        let dir = dir_with(&["user_10.json", "user_2.json", "user_05.json", "user_5.json", "notes.txt"]);
        std::fs::create_dir(dir.path().join("user_99.json")).unwrap();
        let tracker = FileStateTracker::new(dir.path(), user_pattern());

        let files = tracker.scan().unwrap();
        assert_eq!(sequences(&files), vec![2, 5, 5, 10]);
        assert_eq!(files[1].file_name, "user_05.json");
        assert_eq!(files[2].file_name, "user_5.json");
    }

    #[test]
    fn test_scan_missing_directory_is_config_error() {
        let tracker = FileStateTracker::new("/definitely/not/here", user_pattern());
        assert!(matches!(tracker.scan(), Err(IngestError::Config(_))));
    }

    #[test]
    fn test_full_ignores_destination_state() {
        let dir = dir_with(&["user_1.json", "user_2.json", "user_3.json"]);
        let tracker = FileStateTracker::new(dir.path(), user_pattern());
        let state = ProcessingState {
            max_processed: Some(3),
            processed_files: 3,
        };

        let selected = tracker.plan(SelectionMode::Full, &state).unwrap();
        assert_eq!(sequences(&selected), vec![1, 2, 3]);
    }

    #[test]
    fn test_incremental_reselects_boundary_file() {
        let dir = dir_with(&["user_1.json", "user_2.json", "user_4.json", "user_7.json"]);
        let tracker = FileStateTracker::new(dir.path(), user_pattern());
        let state = ProcessingState::from_source_files(
            tracker.pattern(),
            ["user_1.json", "user_2.json", "legacy.csv"],
        );

        assert_eq!(state.max_processed, Some(2));
        assert_eq!(state.processed_files, 2);
        let selected = tracker.plan(SelectionMode::Incremental, &state).unwrap();
        assert_eq!(sequences(&selected), vec![2, 4, 7]);
        assert_eq!(sequences(&tracker.pending(&state).unwrap()), vec![4, 7]);
    }

    #[test]
    fn test_incremental_against_empty_destination_is_full() {
        let dir = dir_with(&["user_0.json", "user_1.json"]);
        let tracker = FileStateTracker::new(dir.path(), user_pattern());

        let selected = tracker
            .plan(SelectionMode::Incremental, &ProcessingState::default())
            .unwrap();
        assert_eq!(sequences(&selected), vec![0, 1]);
    }

    #[test]
    fn test_range_is_half_open_and_ignores_state() {
        let names: Vec<String> = (0..15).map(|i| format!("user_{}.json", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let dir = dir_with(&refs);
        let tracker = FileStateTracker::new(dir.path(), user_pattern());
        let state = ProcessingState {
            max_processed: Some(12),
            processed_files: 13,
        };

        let selected = tracker
            .plan(SelectionMode::Range { start: 5, end: 10 }, &state)
            .unwrap();
        assert_eq!(sequences(&selected), vec![5, 6, 7, 8, 9]);
    }
}
