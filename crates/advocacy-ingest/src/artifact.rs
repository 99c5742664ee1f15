//! Staged intermediate artifact between the normalize and upload stages
//!
//! The artifact is written once per run and is not authoritative after a
//! successful upload. Besides the rows it records which source files went in,
//! with their SHA-256 so an operator can tell whether a file changed after it
//! was staged.

use advocacy_common::checksum::{compute_file_checksum, verify_file_checksum, ChecksumAlgorithm};
use advocacy_common::AdvocacyError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{IngestError, IngestResult};
use crate::file_state::SourceFile;
use crate::models::NormalizedRecord;

/// Provenance of one staged source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedSource {
    pub file_name: String,
    pub sequence: u64,
    /// Hex SHA-256 of the file at staging time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl StagedSource {
    pub fn from_source_file(file: &SourceFile) -> Self {
        let sha256 = match compute_file_checksum(&file.path, ChecksumAlgorithm::Sha256) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(file = %file.file_name, error = %e, "Could not checksum source file");
                None
            },
        };

        Self {
            file_name: file.file_name.clone(),
            sequence: file.sequence,
            sha256,
        }
    }
}

/// The normalized rows of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedArtifact {
    pub generated_at: DateTime<Utc>,
    /// Selection mode the rows were produced under
    pub mode: String,
    pub sources: Vec<StagedSource>,
    pub records: Vec<NormalizedRecord>,
}

/// Either the enveloped form or a bare row array from older runs
#[derive(Deserialize)]
#[serde(untagged)]
enum ArtifactFile {
    Enveloped(StagedArtifact),
    Rows(Vec<NormalizedRecord>),
}

impl StagedArtifact {
    pub fn new(mode: impl Into<String>, sources: Vec<StagedSource>, records: Vec<NormalizedRecord>) -> Self {
        Self {
            generated_at: Utc::now(),
            mode: mode.into(),
            sources,
            records,
        }
    }

    /// Write as pretty JSON, replacing any previous artifact atomically
    pub fn write(&self, path: &Path) -> IngestResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::io(parent, e))?;
        }

        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(&tmp, json).map_err(|e| IngestError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| IngestError::io(path, e))?;

        info!(
            path = %path.display(),
            records = self.records.len(),
            sources = self.sources.len(),
            "Staged normalized artifact"
        );
        Ok(())
    }

    /// Count staged sources whose content changed since staging
    ///
    /// Missing files and files without a recorded digest are not counted.
    pub fn changed_sources(&self, input_dir: &Path) -> usize {
        let mut changed = 0;
        for source in &self.sources {
            let Some(expected) = &source.sha256 else {
                continue;
            };
            let path = input_dir.join(&source.file_name);
            if !path.is_file() {
                continue;
            }
            match verify_file_checksum(&path, expected, ChecksumAlgorithm::Sha256) {
                Ok(()) => {},
                Err(AdvocacyError::ChecksumMismatch { actual, .. }) => {
                    warn!(
                        file = %source.file_name,
                        staged = %expected,
                        current = %actual,
                        "Source file changed after staging"
                    );
                    changed += 1;
                },
                Err(e) => warn!(file = %source.file_name, error = %e, "Could not verify source file"),
            }
        }
        changed
    }

    pub fn read(path: &Path) -> IngestResult<Self> {
        let content = std::fs::read(path).map_err(|e| IngestError::io(path, e))?;
        let artifact = match serde_json::from_slice(&content)? {
            ArtifactFile::Enveloped(artifact) => artifact,
            ArtifactFile::Rows(records) => Self {
                generated_at: Utc::now(),
                mode: "unknown".to_string(),
                sources: Vec::new(),
                records,
            },
        };

        info!(path = %path.display(), records = artifact.records.len(), "Loaded staged artifact");
        Ok(artifact)
    }
}
