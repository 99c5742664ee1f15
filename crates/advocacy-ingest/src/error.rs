//! Error taxonomy for the ingest pipeline
//!
//! Field-level problems ([`ValidationError`]) and dropped records
//! ([`RecordSkipError`]) are values, recovered where they happen and only
//! ever surfaced as counts and log lines. [`IngestError`] is what operations
//! return; when a run stage returns one the run ends with a non-zero exit
//! code.

use thiserror::Error;

/// Result type alias for ingest operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

/// A malformed field value that was replaced by a default
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid email address '{0}'")]
    InvalidEmail(String),

    #[error("unparsable date '{0}'")]
    InvalidDate(String),

    #[error("invalid post URL '{0}'")]
    InvalidUrl(String),

    #[error("social handle '{raw}' has no characters valid on {platform}")]
    InvalidHandle { platform: String, raw: String },

    #[error("non-numeric value '{0}' defaulted to 0")]
    NotNumeric(String),

    #[error("negative value {0} clamped to 0")]
    Negative(f64),

    #[error("{field} total {value} exceeds the storable range, clamped")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("missing {0}, default substituted")]
    Missing(&'static str),

    #[error("field '{field}' has unexpected type, expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}

impl ValidationError {
    /// Stable label used to tally issues by kind
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::InvalidEmail(_) => "invalid_email",
            ValidationError::InvalidDate(_) => "invalid_date",
            ValidationError::InvalidUrl(_) => "invalid_url",
            ValidationError::InvalidHandle { .. } => "invalid_handle",
            ValidationError::NotNumeric(_) => "not_numeric",
            ValidationError::Negative(_) => "negative_value",
            ValidationError::OutOfRange { .. } => "out_of_range",
            ValidationError::Missing(_) => "missing_field",
            ValidationError::WrongType { .. } => "wrong_type",
        }
    }
}

/// A record dropped because a mandatory identifier is absent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("record skipped in {source_file}: missing {missing}")]
pub struct RecordSkipError {
    pub source_file: String,
    pub missing: &'static str,
}

/// Main error type for the ingest pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Could not connect to destination after {attempts} attempt(s): {message}")]
    Connection { attempts: u32, message: String },

    #[error("Batch {batch_index} (rows {start}..{end}) rolled back: {source}")]
    Transaction {
        batch_index: usize,
        start: usize,
        end: usize,
        #[source]
        source: Box<IngestError>,
    },

    #[error("Destination schema mismatch: {0}")]
    Schema(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] advocacy_common::AdvocacyError),
}

impl IngestError {
    /// Attach a path to an IO failure
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
