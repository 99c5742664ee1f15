//! Advocacy Common Library
//!
//! Shared error handling, logging and file utilities for the advocacy
//! ingestion workspace.
//!
//! # Overview
//!
//! - **Error Handling**: `AdvocacyError` and the crate-wide `Result` alias
//! - **Logging**: environment-driven `tracing` setup shared by every binary
//! - **Checksums**: content digests recorded for source-file provenance
//!
//! # Example
//!
//! ```no_run
//! use advocacy_common::{Result, checksum::{compute_file_checksum, ChecksumAlgorithm}};
//!
//! fn fingerprint(path: &str) -> Result<String> {
//!     compute_file_checksum(path, ChecksumAlgorithm::Sha256)
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{AdvocacyError, Result};
