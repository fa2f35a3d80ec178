//! Custom assertion helpers for timeline tests.

use mantle_core::WritePrecondition;
use mantle_timeline::{Action, Instant, InstantFilter, State, Timeline};

use crate::storage::StorageOp;

/// Asserts that timestamps strictly increase along the timeline.
///
/// # Panics
///
/// Panics on the first pair that is not strictly increasing.
pub fn assert_strictly_increasing(timeline: &Timeline) {
    let instants: Vec<&Instant> = timeline.instants().collect();
    for pair in instants.windows(2) {
        assert!(
            pair[0].timestamp() < pair[1].timestamp(),
            "Timestamps not strictly increasing: {} then {}",
            pair[0],
            pair[1]
        );
    }
}

/// Asserts that at most one compaction is outstanding.
///
/// # Panics
///
/// Panics if two or more compactions are REQUESTED or INFLIGHT.
pub fn assert_single_pending_compaction(timeline: &Timeline) {
    let pending = timeline.count_instants(&InstantFilter::pending_compaction());
    assert!(
        pending <= 1,
        "Expected at most one outstanding compaction, found {pending}"
    );
}

/// Asserts the action and state of the last instant.
///
/// # Panics
///
/// Panics if the timeline is empty or the last instant differs.
pub fn assert_last_instant(timeline: &Timeline, action: Action, state: State) {
    let last = timeline
        .last_instant(&InstantFilter::all())
        .expect("timeline is empty");
    assert_eq!(
        (last.action(), last.state()),
        (action, state),
        "Unexpected last instant {last}"
    );
}

/// Asserts that every marker write used a conditional precondition.
///
/// # Panics
///
/// Panics on any unconditional put.
pub fn assert_all_puts_conditional(ops: &[StorageOp]) {
    for op in ops {
        if let StorageOp::Put {
            path, precondition, ..
        } = op
        {
            assert_ne!(
                precondition,
                &WritePrecondition::None,
                "Unconditional put to {path}"
            );
        }
    }
}
