//! Write pipeline: delta commits followed by inline compaction.
//!
//! Each delta commit walks REQUESTED, INFLIGHT, COMPLETED around the writer's
//! `ingest`. When inline compaction is enabled, a coordinator cycle runs
//! before the call returns, so a caller observes the compaction (new or
//! retried) on the timeline as soon as the delta commit returns.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mantle_core::TableStorage;
use mantle_core::observability::timeline_span;
use tracing::{Instrument as _, info, warn};

use crate::config::CompactionConfig;
use crate::coordinator::{CompactionCoordinator, CompactionOutcome};
use crate::error::Result;
use crate::instant::{Action, Instant, InstantTime, State};
use crate::metrics;
use crate::timeline::TimelineStore;
use crate::types::{CommitMetadata, InstantDetails, WriteBatch};
use crate::writer::TableWriter;

/// Result of [`WritePipeline::create_delta_commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaCommitResult {
    /// The completed delta commit.
    pub instant: Instant,
    /// What the writer reported for it.
    pub metadata: CommitMetadata,
    /// Inline coordinator outcome; `NoAction` when inline compaction is off.
    pub compaction: CompactionOutcome,
}

/// Write path of one table session.
#[derive(Clone)]
pub struct WritePipeline {
    timeline: Arc<TimelineStore>,
    writer: Arc<dyn TableWriter>,
    coordinator: CompactionCoordinator,
}

impl std::fmt::Debug for WritePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritePipeline")
            .field("table", &self.timeline.table())
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl WritePipeline {
    /// Creates a pipeline over an open timeline.
    ///
    /// # Errors
    ///
    /// Returns [`crate::TimelineError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        timeline: Arc<TimelineStore>,
        writer: Arc<dyn TableWriter>,
        config: CompactionConfig,
    ) -> Result<Self> {
        let coordinator = CompactionCoordinator::new(timeline.clone(), writer.clone(), config)?;
        Ok(Self {
            timeline,
            writer,
            coordinator,
        })
    }

    /// Opens the table's timeline and creates a pipeline over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the timeline cannot be loaded or `config` is invalid.
    pub async fn open(
        storage: TableStorage,
        writer: Arc<dyn TableWriter>,
        config: CompactionConfig,
    ) -> Result<Self> {
        let timeline = Arc::new(TimelineStore::open(storage).await?);
        Self::new(timeline, writer, config)
    }

    /// Timeline written by this pipeline.
    #[must_use]
    pub fn timeline(&self) -> &Arc<TimelineStore> {
        &self.timeline
    }

    /// Coordinator used for inline compaction.
    #[must_use]
    pub fn coordinator(&self) -> &CompactionCoordinator {
        &self.coordinator
    }

    /// Writes `batch` as a delta commit at `timestamp`.
    ///
    /// # Errors
    ///
    /// - [`crate::TimelineError::OutOfOrderInstant`] if `timestamp` is not
    ///   after the last instant
    /// - [`crate::TimelineError::Execution`] if ingest fails; the delta commit
    ///   stays INFLIGHT. Also returned when the inline compaction's merge fails,
    ///   in which case the delta commit itself has completed.
    pub async fn create_delta_commit(
        &self,
        timestamp: InstantTime,
        batch: &WriteBatch,
        now: DateTime<Utc>,
    ) -> Result<DeltaCommitResult> {
        self.timeline.refresh().await?;
        self.commit(timestamp, batch, now).await
    }

    /// Writes `batch` as a delta commit at a timestamp generated from `now`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_delta_commit`].
    pub async fn start_delta_commit(
        &self,
        batch: &WriteBatch,
        now: DateTime<Utc>,
    ) -> Result<DeltaCommitResult> {
        self.timeline.refresh().await?;
        let timestamp = self.timeline.new_instant_time(now)?;
        self.commit(timestamp, batch, now).await
    }

    async fn commit(
        &self,
        timestamp: InstantTime,
        batch: &WriteBatch,
        now: DateTime<Utc>,
    ) -> Result<DeltaCommitResult> {
        let span = timeline_span("delta_commit", self.timeline.table(), timestamp.as_str());
        let (instant, metadata) = self
            .write_delta(timestamp, batch, now)
            .instrument(span)
            .await?;

        let compaction = if self.coordinator.config().inline_compaction {
            self.coordinator.run(now).await?
        } else {
            CompactionOutcome::NoAction
        };

        Ok(DeltaCommitResult {
            instant,
            metadata,
            compaction,
        })
    }

    async fn write_delta(
        &self,
        timestamp: InstantTime,
        batch: &WriteBatch,
        now: DateTime<Utc>,
    ) -> Result<(Instant, CommitMetadata)> {
        let table = self.timeline.table();
        let requested = self
            .timeline
            .append_at(
                Instant::requested(timestamp, Action::DeltaCommit),
                InstantDetails::Empty,
                now,
            )
            .await?;
        let inflight = self
            .timeline
            .transition(&requested, State::Inflight)
            .await?;

        let metadata = match self.writer.ingest(inflight.timestamp(), batch).await {
            Ok(metadata) => metadata,
            Err(err) => {
                metrics::record_execution_failure(table, Action::DeltaCommit.as_label());
                warn!(error = %err, "ingest failed; delta commit left inflight");
                return Err(err.into_execution(format!(
                    "ingest failed for delta commit {}",
                    inflight.timestamp()
                )));
            }
        };

        let completed = self
            .timeline
            .transition_with(
                &inflight,
                State::Completed,
                Some(InstantDetails::CommitMetadata(metadata.clone())),
            )
            .await?;

        metrics::record_delta_commit(table);
        info!(
            records = batch.len(),
            file_groups = metadata.file_groups.len(),
            "delta commit completed"
        );
        Ok((completed, metadata))
    }
}
