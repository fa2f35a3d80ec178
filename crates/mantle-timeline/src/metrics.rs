//! Timeline and compaction metrics.
//!
//! These complement the structured logging emitted by the store, the
//! coordinator and the pipeline.

use metrics::{counter, describe_counter, describe_histogram, histogram};

// ============================================================================
// Metric names
// ============================================================================

/// Completed delta commits.
pub const DELTA_COMMITS: &str = "mantle_delta_commits_total";

/// Compactions appended as REQUESTED, labelled by trigger reason.
pub const COMPACTIONS_SCHEDULED: &str = "mantle_compactions_scheduled_total";

/// Compactions moved to COMPLETED, labelled by `mode` (`new` / `retry`).
pub const COMPACTIONS_COMPLETED: &str = "mantle_compactions_completed_total";

/// Outstanding compactions adopted from an earlier session or cycle.
pub const COMPACTION_RETRIES: &str = "mantle_compaction_retries_total";

/// Duration of merge execution.
pub const COMPACTION_DURATION: &str = "mantle_compaction_duration_seconds";

/// Transitions rejected because the persisted state moved underneath.
pub const TRANSITION_CONFLICTS: &str = "mantle_timeline_transition_conflicts_total";

/// Ingest or merge failures reported by the writer.
pub const EXECUTION_FAILURES: &str = "mantle_execution_failures_total";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all timeline metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(DELTA_COMMITS, "Total completed delta commits");
    describe_counter!(COMPACTIONS_SCHEDULED, "Total compactions scheduled");
    describe_counter!(COMPACTIONS_COMPLETED, "Total compactions completed");
    describe_counter!(
        COMPACTION_RETRIES,
        "Total outstanding compactions adopted for retry"
    );
    describe_histogram!(COMPACTION_DURATION, "Duration of compaction merges in seconds");
    describe_counter!(TRANSITION_CONFLICTS, "Total rejected stale transitions");
    describe_counter!(EXECUTION_FAILURES, "Total ingest/merge failures");
}

// ============================================================================
// Recording
// ============================================================================

/// Records a completed delta commit.
pub fn record_delta_commit(table: &str) {
    counter!(DELTA_COMMITS, "table" => table.to_string()).increment(1);
}

/// Records a newly scheduled compaction.
pub fn record_compaction_scheduled(table: &str, reason: &str) {
    counter!(
        COMPACTIONS_SCHEDULED,
        "table" => table.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Records a completed compaction and its merge duration.
pub fn record_compaction_completed(table: &str, mode: &str, duration_secs: f64) {
    let labels = [("table", table.to_string()), ("mode", mode.to_string())];

    counter!(COMPACTIONS_COMPLETED, &labels).increment(1);
    histogram!(COMPACTION_DURATION, &labels).record(duration_secs);
}

/// Records adoption of an outstanding compaction.
pub fn record_compaction_retry(table: &str, state: &str) {
    counter!(
        COMPACTION_RETRIES,
        "table" => table.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

/// Records a rejected stale transition.
pub fn record_transition_conflict(table: &str, action: &str) {
    counter!(
        TRANSITION_CONFLICTS,
        "table" => table.to_string(),
        "action" => action.to_string()
    )
    .increment(1);
}

/// Records a writer failure.
pub fn record_execution_failure(table: &str, action: &str) {
    counter!(
        EXECUTION_FAILURES,
        "table" => table.to_string(),
        "action" => action.to_string()
    )
    .increment(1);
}
