//! Compaction coordination.
//!
//! One coordinator cycle ([`CompactionCoordinator::run`]):
//!
//! 1) Refreshes the timeline so writes from other sessions are visible.
//! 2) Adopts an outstanding compaction, if any, and drives it to completion.
//!    No new compaction is evaluated in that cycle.
//! 3) Otherwise asks the policy. On a trigger, appends a REQUESTED compaction
//!    with its plan and, when inline, executes it immediately.
//!
//! Execution is INFLIGHT, merge, COMPLETED. A merge failure leaves the instant
//! INFLIGHT; the next cycle (in this or any later session) retries it under
//! its original timestamp.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mantle_core::observability::{compaction_span, timeline_span};
use tracing::{Instrument as _, debug, info, warn};

use crate::config::CompactionConfig;
use crate::error::{Result, TimelineError};
use crate::instant::{Action, Instant, InstantTime, State};
use crate::metrics;
use crate::policy::{self, CompactionDecision, TriggerReason};
use crate::timeline::{Timeline, TimelineStore};
use crate::types::{CommitMetadata, CompactionPlan, InstantDetails};
use crate::writer::TableWriter;

static NO_METADATA: CommitMetadata = CommitMetadata {
    file_groups: Vec::new(),
    records_written: 0,
};

/// Result of one coordinator cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Nothing was scheduled or executed.
    NoAction,
    /// An outstanding compaction was adopted and completed.
    Retried(Instant),
    /// A new compaction was scheduled and executed inline.
    Executed(Instant),
    /// A new compaction was scheduled (REQUESTED) for an external executor.
    Scheduled(Instant),
}

impl CompactionOutcome {
    /// The compaction instant touched by the cycle, if any.
    #[must_use]
    pub fn instant(&self) -> Option<&Instant> {
        match self {
            Self::NoAction => None,
            Self::Retried(instant) | Self::Executed(instant) | Self::Scheduled(instant) => {
                Some(instant)
            }
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::NoAction => "no_action",
            Self::Retried(_) => "retried",
            Self::Executed(_) => "executed",
            Self::Scheduled(_) => "scheduled",
        }
    }
}

/// Schedules and executes compactions for one table.
#[derive(Clone)]
pub struct CompactionCoordinator {
    timeline: Arc<TimelineStore>,
    writer: Arc<dyn TableWriter>,
    config: CompactionConfig,
}

impl std::fmt::Debug for CompactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionCoordinator")
            .field("table", &self.timeline.table())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CompactionCoordinator {
    /// Creates a coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::InvalidConfig`] if `config` fails validation.
    pub fn new(
        timeline: Arc<TimelineStore>,
        writer: Arc<dyn TableWriter>,
        config: CompactionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            timeline,
            writer,
            config,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Timeline this coordinator operates on.
    #[must_use]
    pub fn timeline(&self) -> &Arc<TimelineStore> {
        &self.timeline
    }

    /// Runs one coordinator cycle at `now`.
    ///
    /// # Errors
    ///
    /// - [`TimelineError::Execution`] if the merge fails; the compaction stays
    ///   INFLIGHT and is retried by the next cycle
    /// - [`TimelineError::InvalidTransition`] if another session moved the
    ///   compaction concurrently; refresh and run again
    /// - storage errors
    pub async fn run(&self, now: DateTime<Utc>) -> Result<CompactionOutcome> {
        let span = compaction_span(self.timeline.table(), self.config.inline_compaction);
        self.run_cycle(now).instrument(span).await
    }

    async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CompactionOutcome> {
        self.timeline.refresh().await?;

        if let Some(completed) = self.complete_pending().await? {
            return Ok(CompactionOutcome::Retried(completed));
        }

        let timeline = self.timeline.timeline()?;
        let CompactionDecision::TriggerNow { reason } =
            policy::decide(&timeline, &self.config, now)
        else {
            debug!("no compaction needed");
            return Ok(CompactionOutcome::NoAction);
        };

        let timestamp = self.timeline.new_instant_time(now)?;
        let requested = self.schedule(&timeline, timestamp, reason, now).await?;
        if !self.config.inline_compaction {
            return Ok(CompactionOutcome::Scheduled(requested));
        }

        let completed = self.execute(&requested, "new").await?;
        Ok(CompactionOutcome::Executed(completed))
    }

    /// Adopts and completes the outstanding compaction, if any.
    ///
    /// Entry point for an executor running separately from the writers.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run`].
    pub async fn retry_pending(&self) -> Result<Option<Instant>> {
        self.timeline.refresh().await?;
        self.complete_pending().await
    }

    /// Evaluates the policy and, on a trigger, appends a REQUESTED compaction
    /// at `timestamp` without executing it.
    ///
    /// Returns `None` when the policy decides no compaction is needed.
    ///
    /// # Errors
    ///
    /// - [`TimelineError::CompactionAlreadyPending`] if one is outstanding
    /// - [`TimelineError::OutOfOrderInstant`] if `timestamp` is not after the
    ///   last instant
    pub async fn schedule_compaction_at(
        &self,
        timestamp: InstantTime,
        now: DateTime<Utc>,
    ) -> Result<Option<Instant>> {
        self.timeline.refresh().await?;
        let timeline = self.timeline.timeline()?;

        if let Some(pending) = timeline.pending_compaction() {
            return Err(TimelineError::CompactionAlreadyPending {
                pending: pending.timestamp().clone(),
                state: pending.state(),
            });
        }

        match policy::decide(&timeline, &self.config, now) {
            CompactionDecision::NoAction => Ok(None),
            CompactionDecision::TriggerNow { reason } => {
                self.schedule(&timeline, timestamp, reason, now)
                    .await
                    .map(Some)
            }
        }
    }

    async fn complete_pending(&self) -> Result<Option<Instant>> {
        let timeline = self.timeline.timeline()?;
        let Some(pending) = timeline.pending_compaction().cloned() else {
            return Ok(None);
        };

        warn!(
            table = self.timeline.table(),
            instant = %pending,
            "adopting outstanding compaction"
        );
        metrics::record_compaction_retry(self.timeline.table(), pending.state().as_label());

        self.execute(&pending, "retry").await.map(Some)
    }

    async fn schedule(
        &self,
        timeline: &Timeline,
        timestamp: InstantTime,
        reason: TriggerReason,
        now: DateTime<Utc>,
    ) -> Result<Instant> {
        let plan = build_plan(timeline);
        let file_groups = plan.file_groups.len();
        let delta_commits = plan.delta_commits.len();

        let requested = self
            .timeline
            .append_at(
                Instant::requested(timestamp, Action::Compaction),
                InstantDetails::CompactionPlan(plan),
                now,
            )
            .await?;

        info!(
            table = self.timeline.table(),
            instant = %requested,
            reason = reason.as_label(),
            delta_commits,
            file_groups,
            "scheduled compaction"
        );
        metrics::record_compaction_scheduled(self.timeline.table(), reason.as_label());
        Ok(requested)
    }

    async fn execute(&self, compaction: &Instant, mode: &'static str) -> Result<Instant> {
        let span = timeline_span(
            "compaction",
            self.timeline.table(),
            compaction.timestamp().as_str(),
        );
        self.execute_inner(compaction, mode).instrument(span).await
    }

    async fn execute_inner(&self, compaction: &Instant, mode: &'static str) -> Result<Instant> {
        let table = self.timeline.table();
        let inflight = match compaction.state() {
            State::Requested => {
                self.timeline
                    .transition(compaction, State::Inflight)
                    .await?
            }
            _ => compaction.clone(),
        };

        let plan = self
            .timeline
            .timeline()?
            .details(inflight.timestamp())
            .and_then(InstantDetails::compaction_plan)
            .cloned()
            .unwrap_or_default();

        let started = std::time::Instant::now();
        if let Err(err) = self.writer.merge(inflight.timestamp(), &plan).await {
            metrics::record_execution_failure(table, Action::Compaction.as_label());
            warn!(error = %err, "merge failed; compaction left inflight");
            return Err(err.into_execution(format!(
                "merge failed for compaction {}",
                inflight.timestamp()
            )));
        }

        let completed = self
            .timeline
            .transition(&inflight, State::Completed)
            .await?;
        metrics::record_compaction_completed(table, mode, started.elapsed().as_secs_f64());
        info!(
            instant = %completed,
            mode,
            file_groups = plan.file_groups.len(),
            "compaction completed"
        );
        Ok(completed)
    }
}

/// Plan covering the completed delta commits since the last compaction.
fn build_plan(timeline: &Timeline) -> CompactionPlan {
    let last = timeline
        .last_completed_compaction()
        .map(Instant::timestamp);
    CompactionPlan::from_delta_commits(timeline.completed_delta_commits_after(last).map(
        |instant| {
            let metadata = timeline
                .details(instant.timestamp())
                .and_then(InstantDetails::commit_metadata)
                .unwrap_or(&NO_METADATA);
            (instant.timestamp(), metadata)
        },
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use mantle_core::{MemoryBackend, TableStorage};

    use super::*;
    use crate::instant::InstantFilter;
    use crate::types::{FileGroupId, WriteBatch};

    #[derive(Default)]
    struct Merges(Mutex<Vec<(InstantTime, CompactionPlan)>>);

    #[async_trait]
    impl TableWriter for Merges {
        async fn ingest(&self, _: &InstantTime, _: &WriteBatch) -> Result<CommitMetadata> {
            Ok(CommitMetadata::default())
        }

        async fn merge(&self, instant: &InstantTime, plan: &CompactionPlan) -> Result<()> {
            self.0.lock().unwrap().push((instant.clone(), plan.clone()));
            Ok(())
        }
    }

    fn ts(s: &str) -> InstantTime {
        InstantTime::new(s).unwrap()
    }

    async fn completed_delta(store: &TimelineStore, t: &str, group: &str) {
        let requested = store
            .append(Instant::requested(ts(t), Action::DeltaCommit))
            .await
            .unwrap();
        let inflight = store.transition(&requested, State::Inflight).await.unwrap();
        store
            .transition_with(
                &inflight,
                State::Completed,
                Some(InstantDetails::CommitMetadata(CommitMetadata {
                    file_groups: vec![FileGroupId::new(group)],
                    records_written: 1,
                })),
            )
            .await
            .unwrap();
    }

    async fn setup(config: CompactionConfig) -> (Arc<TimelineStore>, Arc<Merges>, CompactionCoordinator) {
        let storage = TableStorage::new(Arc::new(MemoryBackend::new()), "trips").unwrap();
        let store = Arc::new(TimelineStore::open(storage).await.unwrap());
        let merges = Arc::new(Merges::default());
        let coordinator = CompactionCoordinator::new(store.clone(), merges.clone(), config).unwrap();
        (store, merges, coordinator)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn plan_covers_delta_commits_since_last_compaction() {
        let config = CompactionConfig::default()
            .with_inline_compaction(true)
            .with_max_delta_commits(2);
        let (store, merges, coordinator) = setup(config).await;

        completed_delta(&store, "001", "fg-a").await;
        completed_delta(&store, "002", "fg-b").await;
        let first = coordinator.run(now()).await.unwrap();
        assert!(matches!(first, CompactionOutcome::Executed(_)));

        completed_delta(&store, "20240601000000500", "fg-c").await;
        completed_delta(&store, "20240601000000600", "fg-a").await;
        let second = coordinator.run(now()).await.unwrap();
        assert!(matches!(second, CompactionOutcome::Executed(_)));

        let merges = merges.0.lock().unwrap();
        assert_eq!(merges.len(), 2);
        assert_eq!(merges[0].1.delta_commits, vec![ts("001"), ts("002")]);
        assert_eq!(
            merges[1].1.file_groups,
            vec![FileGroupId::new("fg-a"), FileGroupId::new("fg-c")]
        );
        assert_eq!(merges[1].1.delta_commits.len(), 2);
    }

    #[tokio::test]
    async fn schedule_only_leaves_compaction_requested() {
        let (store, merges, coordinator) =
            setup(CompactionConfig::default().with_max_delta_commits(1)).await;
        completed_delta(&store, "001", "fg-a").await;

        let outcome = coordinator.run(now()).await.unwrap();
        let CompactionOutcome::Scheduled(requested) = outcome else {
            panic!("expected a scheduled compaction, got {outcome:?}");
        };
        assert_eq!(requested.state(), State::Requested);
        assert!(merges.0.lock().unwrap().is_empty());

        // The next cycle adopts it instead of scheduling another.
        let outcome = coordinator.run(now()).await.unwrap();
        assert_eq!(outcome.as_label(), "retried");
        assert_eq!(outcome.instant().unwrap().timestamp(), requested.timestamp());
        assert_eq!(
            store
                .count_instants(&InstantFilter::commits().completed())
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn schedule_at_rejects_second_pending_compaction() {
        let (store, _merges, coordinator) =
            setup(CompactionConfig::default().with_max_delta_commits(1)).await;
        completed_delta(&store, "001", "fg-a").await;

        let scheduled = coordinator
            .schedule_compaction_at(ts("002"), now())
            .await
            .unwrap();
        assert!(scheduled.is_some());

        let err = coordinator
            .schedule_compaction_at(ts("003"), now())
            .await
            .unwrap_err();
        assert!(matches!(err, TimelineError::CompactionAlreadyPending { .. }));
    }

    #[tokio::test]
    async fn schedule_at_returns_none_below_thresholds() {
        let (store, _merges, coordinator) =
            setup(CompactionConfig::default().with_max_delta_commits(3)).await;
        completed_delta(&store, "001", "fg-a").await;

        assert!(
            coordinator
                .schedule_compaction_at(ts("002"), now())
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.timeline().unwrap().len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let storage = TableStorage::new(Arc::new(MemoryBackend::new()), "trips").unwrap();
        let store = tokio_test::block_on(TimelineStore::open(storage)).unwrap();
        let err = CompactionCoordinator::new(
            Arc::new(store),
            Arc::new(Merges::default()),
            CompactionConfig::default().with_max_delta_commits(0),
        )
        .unwrap_err();
        assert!(matches!(err, TimelineError::InvalidConfig { .. }));
    }
}
