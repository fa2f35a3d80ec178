//! Pre-built test fixtures for common timeline scenarios.
//!
//! Provides a recording [`TableWriter`], a [`TestTable`] that opens sessions
//! over shared storage, and factory functions for records and batches.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mantle_core::TableStorage;
use mantle_timeline::{
    CommitMetadata, CompactionConfig, CompactionPlan, FileGroupId, InstantTime, Record,
    TableWriter, TimelineError, TimelineStore, WriteBatch, WritePipeline,
};

use crate::simulation::SimulatedClock;
use crate::storage::TracingMemoryBackend;

/// Writer that records calls instead of writing files.
///
/// Each distinct partition path of a batch maps to one file group
/// (`fg-{partition}` with `/` replaced by `-`).
#[derive(Debug, Default)]
pub struct RecordingWriter {
    ingests: Mutex<Vec<(InstantTime, usize)>>,
    merges: Mutex<Vec<(InstantTime, CompactionPlan)>>,
    fail_ingests: AtomicUsize,
    fail_merges: AtomicUsize,
}

impl RecordingWriter {
    /// Creates a writer that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` ingests fail.
    pub fn fail_next_ingests(&self, count: usize) {
        self.fail_ingests.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` merges fail.
    pub fn fail_next_merges(&self, count: usize) {
        self.fail_merges.store(count, Ordering::SeqCst);
    }

    /// Successful ingests: delta commit and record count.
    #[must_use]
    pub fn ingests(&self) -> Vec<(InstantTime, usize)> {
        self.ingests.lock().expect("lock").clone()
    }

    /// Successful merges: compaction instant and plan.
    #[must_use]
    pub fn merges(&self) -> Vec<(InstantTime, CompactionPlan)> {
        self.merges.lock().expect("lock").clone()
    }

    /// File group a partition path maps to.
    #[must_use]
    pub fn file_group_for(partition_path: &str) -> FileGroupId {
        FileGroupId::new(format!("fg-{}", partition_path.replace('/', "-")))
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TableWriter for RecordingWriter {
    async fn ingest(
        &self,
        instant: &InstantTime,
        batch: &WriteBatch,
    ) -> mantle_timeline::Result<CommitMetadata> {
        if Self::take_failure(&self.fail_ingests) {
            return Err(TimelineError::execution(format!(
                "injected ingest failure for {instant}"
            )));
        }

        let file_groups: BTreeSet<_> = batch
            .records()
            .iter()
            .map(|r| Self::file_group_for(&r.partition_path))
            .collect();
        self.ingests
            .lock()
            .expect("lock")
            .push((instant.clone(), batch.len()));

        Ok(CommitMetadata {
            file_groups: file_groups.into_iter().collect(),
            records_written: batch.len() as u64,
        })
    }

    async fn merge(&self, instant: &InstantTime, plan: &CompactionPlan) -> mantle_timeline::Result<()> {
        if Self::take_failure(&self.fail_merges) {
            return Err(TimelineError::execution(format!(
                "injected merge failure for {instant}"
            )));
        }
        self.merges
            .lock()
            .expect("lock")
            .push((instant.clone(), plan.clone()));
        Ok(())
    }
}

/// One table over shared in-memory storage.
///
/// Every [`Self::session`] opens a fresh timeline over the same objects,
/// which is how a restarted writer sees the table.
#[derive(Debug)]
pub struct TestTable {
    /// Shared storage backend.
    pub backend: TracingMemoryBackend,
    /// Writer shared by all sessions.
    pub writer: Arc<RecordingWriter>,
    /// Clock shared by all sessions.
    pub clock: SimulatedClock,
    /// Table name.
    pub table: String,
}

impl TestTable {
    /// Creates an empty `trips` table.
    #[must_use]
    pub fn new() -> Self {
        Self::named("trips")
    }

    /// Creates an empty table with the given name.
    #[must_use]
    pub fn named(table: impl Into<String>) -> Self {
        Self {
            backend: TracingMemoryBackend::new(),
            writer: Arc::new(RecordingWriter::new()),
            clock: SimulatedClock::deterministic(),
            table: table.into(),
        }
    }

    /// Table-scoped storage over the shared backend.
    #[must_use]
    pub fn storage(&self) -> TableStorage {
        TableStorage::new(Arc::new(self.backend.clone()), self.table.clone())
            .expect("valid table name")
    }

    /// Opens a fresh timeline store.
    pub async fn open_store(&self) -> Arc<TimelineStore> {
        Arc::new(
            TimelineStore::open(self.storage())
                .await
                .expect("open timeline"),
        )
    }

    /// Opens a new writer session with `config`.
    pub async fn session(&self, config: CompactionConfig) -> WritePipeline {
        WritePipeline::new(self.open_store().await, self.writer.clone(), config)
            .expect("valid config")
    }

    /// Backend path of the marker for `timestamp`.
    #[must_use]
    pub fn marker_path(&self, timestamp: &str) -> String {
        format!(
            "tables/{}/{}",
            self.table,
            TableStorage::instant_marker_path(timestamp)
        )
    }
}

impl Default for TestTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses an instant time.
#[must_use]
pub fn ts(value: &str) -> InstantTime {
    InstantTime::new(value).expect("valid instant time")
}

/// Creates a record with a small JSON payload.
#[must_use]
pub fn record(key: impl Into<String>, partition_path: &str) -> Record {
    let key = key.into();
    let payload = format!("{{\"key\":\"{key}\"}}");
    Record::new(key, partition_path, payload)
}

/// Creates a batch of `count` records in one partition.
#[must_use]
pub fn batch(count: usize, partition_path: &str) -> WriteBatch {
    (0..count)
        .map(|i| record(format!("{partition_path}-{i}"), partition_path))
        .collect()
}

/// Creates a batch with one record per partition.
#[must_use]
pub fn batch_across(partition_paths: &[&str]) -> WriteBatch {
    partition_paths
        .iter()
        .enumerate()
        .map(|(i, p)| record(format!("key-{i}"), p))
        .collect()
}
