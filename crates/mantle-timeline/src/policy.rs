//! Compaction scheduling policy.
//!
//! A pure function of a timeline snapshot, the configuration and the current
//! time. Two rules are OR-combined:
//!
//! - **Count rule**: completed delta commits since the last completed
//!   compaction (all of them if none) reach
//!   `max_num_delta_commits_before_compaction`.
//! - **Time rule**: the time since the last completed compaction (or since the
//!   first instant, i.e. table creation) reaches
//!   `max_delta_time_before_compaction`. A reference whose timestamp has no
//!   wall-clock meaning is timed from when it was requested.
//!
//! Nothing is decided while a compaction is outstanding.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::CompactionConfig;
use crate::instant::{InstantFilter, InstantTime};
use crate::timeline::Timeline;

/// Why a compaction was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// The count rule fired.
    DeltaCommits {
        /// Completed delta commits since the last compaction.
        count: usize,
    },
    /// The time rule fired.
    ElapsedTime {
        /// Time since the last compaction or table creation.
        elapsed: Duration,
    },
    /// Both rules fired.
    Both {
        /// Completed delta commits since the last compaction.
        count: usize,
        /// Time since the last compaction or table creation.
        elapsed: Duration,
    },
}

impl TriggerReason {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::DeltaCommits { .. } => "delta_commits",
            Self::ElapsedTime { .. } => "elapsed_time",
            Self::Both { .. } => "both",
        }
    }
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionDecision {
    /// Leave the timeline alone.
    NoAction,
    /// Schedule a compaction now.
    TriggerNow {
        /// Which rule(s) fired.
        reason: TriggerReason,
    },
}

impl CompactionDecision {
    /// Returns true if a compaction should be scheduled.
    #[must_use]
    pub const fn should_compact(&self) -> bool {
        matches!(self, Self::TriggerNow { .. })
    }
}

/// Decides whether a new compaction should be scheduled.
#[must_use]
pub fn decide(
    timeline: &Timeline,
    config: &CompactionConfig,
    now: DateTime<Utc>,
) -> CompactionDecision {
    if timeline.pending_compaction().is_some() {
        return CompactionDecision::NoAction;
    }

    let count = delta_commits_since_last_compaction(timeline);
    let count_fired = count
        >= usize::try_from(config.max_num_delta_commits_before_compaction).unwrap_or(usize::MAX);

    let elapsed = elapsed_since_last_compaction(timeline, now);
    let time_fired = elapsed.is_some_and(|e| e >= config.max_delta_time_before_compaction);

    let reason = match (count_fired, elapsed) {
        (true, Some(elapsed)) if time_fired => TriggerReason::Both { count, elapsed },
        (true, _) => TriggerReason::DeltaCommits { count },
        (false, Some(elapsed)) if time_fired => TriggerReason::ElapsedTime { elapsed },
        _ => return CompactionDecision::NoAction,
    };
    CompactionDecision::TriggerNow { reason }
}

/// Completed delta commits after the last completed compaction.
///
/// In-flight delta commits are never counted.
#[must_use]
pub fn delta_commits_since_last_compaction(timeline: &Timeline) -> usize {
    let last = timeline
        .last_completed_compaction()
        .map(|instant| instant.timestamp());
    timeline.completed_delta_commits_after(last).count()
}

/// Time since the last completed compaction, or since the first instant.
///
/// The reference time is the one encoded in the reference timestamp, or the
/// recorded request time when the timestamp is opaque.
///
/// `None` for an empty timeline, an opaque reference with no recorded request
/// time, or a reference in the future.
#[must_use]
pub fn elapsed_since_last_compaction(timeline: &Timeline, now: DateTime<Utc>) -> Option<Duration> {
    let reference = timeline
        .last_completed_compaction()
        .or_else(|| timeline.first_instant(&InstantFilter::all()))?;
    let at = reference_time(timeline, reference.timestamp())?;
    (now - at).to_std().ok()
}

fn reference_time(timeline: &Timeline, timestamp: &InstantTime) -> Option<DateTime<Utc>> {
    timestamp
        .to_datetime()
        .or_else(|| timeline.requested_at(timestamp))
}
