//! In-process destination
//!
//! Enforces the same rules as the PostgreSQL table: non-negative counters, a
//! unique composite key and all-or-nothing batches. A caller-supplied predicate
//! can reject rows to simulate constraint violations.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{DestinationStore, DestinationSummary};
use crate::error::{IngestError, IngestResult};
use crate::models::{NormalizedRecord, RecordKey};

type RowPredicate = Arc<dyn Fn(&NormalizedRecord) -> bool + Send + Sync>;

#[derive(Default)]
struct State {
    rows: Vec<NormalizedRecord>,
    keys: HashSet<RecordKey>,
    batch_attempts: usize,
}

/// Destination held in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    reject: Option<RowPredicate>,
    schema_mismatch: Option<String>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("rows", &self.rows().len())
            .field("rejects_rows", &self.reject.is_some())
            .field("schema_mismatch", &self.schema_mismatch)
            .finish()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from rows already committed by an earlier run
    pub fn with_rows(rows: Vec<NormalizedRecord>) -> Self {
        let store = Self::default();
        {
            let mut state = store.lock();
            state.keys = rows.iter().map(NormalizedRecord::key).collect();
            state.rows = rows;
        }
        store
    }

    /// Treat any row matching `predicate` as a constraint violation
    pub fn rejecting<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&NormalizedRecord) -> bool + Send + Sync + 'static,
    {
        self.reject = Some(Arc::new(predicate));
        self
    }

    /// Make `ensure_schema` report an incompatible table
    pub fn with_schema_mismatch(mut self, reason: impl Into<String>) -> Self {
        self.schema_mismatch = Some(reason.into());
        self
    }

    /// Snapshot of the committed rows in insertion order
    pub fn rows(&self) -> Vec<NormalizedRecord> {
        self.lock().rows.clone()
    }

    /// Number of `insert_batch` calls, committed or not
    pub fn batch_attempts(&self) -> usize {
        self.lock().batch_attempts
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave a half-applied batch
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn violation(&self, row: &NormalizedRecord, keys: &HashSet<RecordKey>) -> Option<String> {
        let key = row.key();
        if keys.contains(&key) {
            return Some(format!(
                "duplicate key ({}, {}, {}, {})",
                key.user_id, key.program_id, key.platform, key.source_file
            ));
        }

        let negative = row.tasks_completed < 0
            || row.total_likes < 0
            || row.total_comments < 0
            || row.total_shares < 0
            || row.total_reach < 0
            || row.total_sales_attributed < 0.0;
        if negative {
            return Some(format!("negative counter for user {}", row.user_id));
        }

        if self.reject.as_ref().is_some_and(|reject| reject(row)) {
            return Some(format!(
                "row rejected for user {} in {}",
                row.user_id, row.source_file
            ));
        }

        None
    }
}

#[async_trait]
impl DestinationStore for MemoryStore {
    async fn ensure_schema(&self) -> IngestResult<()> {
        match &self.schema_mismatch {
            Some(reason) => Err(IngestError::Schema(reason.clone())),
            None => Ok(()),
        }
    }

    async fn processed_source_files(&self) -> IngestResult<Vec<String>> {
        let state = self.lock();
        let mut files: Vec<String> = state
            .rows
            .iter()
            .map(|row| row.source_file.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        files.sort();
        Ok(files)
    }

    async fn existing_keys(&self, keys: &[RecordKey]) -> IngestResult<HashSet<RecordKey>> {
        let state = self.lock();
        Ok(keys
            .iter()
            .filter(|key| state.keys.contains(key))
            .cloned()
            .collect())
    }

    async fn insert_batch(&self, rows: &[NormalizedRecord]) -> IngestResult<u64> {
        let mut state = self.lock();
        state.batch_attempts += 1;

        // Validate the whole batch against a scratch key set before touching state
        let mut pending = state.keys.clone();
        for row in rows {
            if let Some(reason) = self.violation(row, &pending) {
                return Err(IngestError::Constraint(reason));
            }
            pending.insert(row.key());
        }

        state.keys = pending;
        state.rows.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn summary(&self) -> IngestResult<DestinationSummary> {
        let state = self.lock();
        let mut platforms = BTreeMap::new();
        for row in &state.rows {
            *platforms.entry(row.platform.clone()).or_insert(0u64) += 1;
        }
        let distinct_users = state
            .rows
            .iter()
            .map(|row| row.user_id.as_str())
            .collect::<HashSet<_>>()
            .len() as u64;

        Ok(DestinationSummary {
            total_rows: state.rows.len() as u64,
            distinct_users,
            platforms,
        })
    }
}
