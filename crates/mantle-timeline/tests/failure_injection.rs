//! Storage failures and concurrent sessions against the persisted timeline.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use mantle_core::WritePrecondition;
use mantle_test_utils::{StorageOp, TestTable, batch, ts};
use mantle_timeline::{
    Action, CompactionConfig, Instant, InstantDetails, InstantFilter, InstantMarker, State,
    TimelineError,
};

#[tokio::test]
async fn failed_transition_write_leaves_persisted_state_untouched() {
    let table = TestTable::new();
    let session = table
        .session(CompactionConfig::default().with_max_delta_commits(1))
        .await;
    session
        .create_delta_commit(ts("001"), &batch(1, "a"), table.clock.now())
        .await
        .unwrap();
    session
        .coordinator()
        .schedule_compaction_at(ts("002"), table.clock.now())
        .await
        .unwrap();

    table.backend.fail_next_puts(table.marker_path("002"), 1);
    let err = session.coordinator().retry_pending().await.unwrap_err();
    assert!(matches!(err, TimelineError::Storage(_)), "{err}");

    let store = table.open_store().await;
    let pending = store
        .first_instant(&InstantFilter::pending_compaction())
        .unwrap()
        .unwrap();
    assert_eq!(pending.state(), State::Requested);
    assert!(table.writer.merges().is_empty());

    let completed = session
        .coordinator()
        .retry_pending()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(completed.timestamp(), &ts("002"));
}

#[tokio::test]
async fn stale_session_cannot_move_an_instant_twice() {
    let table = TestTable::new();
    let a = table.open_store().await;
    let b = table.open_store().await;

    let requested = a
        .append(Instant::requested(ts("001"), Action::Compaction))
        .await
        .unwrap();
    b.refresh().await.unwrap();
    let seen_by_b = b
        .first_instant(&InstantFilter::pending_compaction())
        .unwrap()
        .unwrap();
    assert_eq!(seen_by_b, requested);

    a.transition(&requested, State::Inflight).await.unwrap();

    let err = b.transition(&seen_by_b, State::Inflight).await.unwrap_err();
    assert!(err.is_stale_view(), "{err}");

    b.refresh().await.unwrap();
    let current = b
        .first_instant(&InstantFilter::pending_compaction())
        .unwrap()
        .unwrap();
    assert_eq!(current.state(), State::Inflight);
    let done = b.transition(&current, State::Completed).await.unwrap();
    assert_eq!(done.action(), Action::Commit);
}

#[tokio::test]
async fn racing_appends_of_the_same_timestamp_admit_one() {
    let table = TestTable::new();
    let a = table.open_store().await;
    let b = table.open_store().await;

    a.append(Instant::requested(ts("001"), Action::DeltaCommit))
        .await
        .unwrap();
    // b has not refreshed, so only the create-if-absent write protects it.
    let err = b
        .append(Instant::requested(ts("001"), Action::DeltaCommit))
        .await
        .unwrap_err();
    assert!(matches!(err, TimelineError::OutOfOrderInstant { .. }));
}

#[tokio::test]
async fn two_coordinators_complete_a_compaction_once() {
    let table = TestTable::new();
    let config = CompactionConfig::default().with_max_delta_commits(1);
    let writer = table.session(config.clone()).await;
    writer
        .start_delta_commit(&batch(1, "a"), table.clock.now())
        .await
        .unwrap();
    table.clock.advance(Duration::from_secs(1));
    writer.coordinator().run(table.clock.now()).await.unwrap();

    let first = table.session(config.clone()).await;
    let second = table.session(config).await;

    let completed = first.coordinator().retry_pending().await.unwrap();
    assert!(completed.is_some());
    // Second coordinator holds a view with the compaction still REQUESTED,
    // but retry_pending refreshes first and finds nothing to do.
    assert!(second.coordinator().retry_pending().await.unwrap().is_none());
    assert_eq!(table.writer.merges().len(), 1);
}

#[tokio::test]
async fn markers_are_written_with_create_then_cas() {
    let table = TestTable::new();
    let session = table.session(CompactionConfig::default()).await;
    session
        .create_delta_commit(ts("001"), &batch(2, "a"), table.clock.now())
        .await
        .unwrap();

    let path = table.marker_path("001");
    let preconditions: Vec<_> = table
        .backend
        .puts()
        .into_iter()
        .filter(|op| op.path() == path)
        .map(|op| match op {
            StorageOp::Put { precondition, .. } => precondition,
            other => panic!("unexpected op {other:?}"),
        })
        .collect();
    assert_eq!(preconditions.len(), 3);
    assert_eq!(preconditions[0], WritePrecondition::DoesNotExist);
    assert!(
        preconditions[1..]
            .iter()
            .all(|p| matches!(p, WritePrecondition::MatchesVersion(_)))
    );

    let marker: InstantMarker =
        serde_json::from_slice(&table.backend.object(&path).unwrap()).unwrap();
    assert_eq!(marker.state, State::Completed);
    let InstantDetails::CommitMetadata(metadata) = marker.details else {
        panic!("completed delta commit records its metadata");
    };
    assert_eq!(metadata.records_written, 2);
}

#[tokio::test]
async fn unreadable_timeline_fails_the_session() {
    let table = TestTable::new();
    let session = table.session(CompactionConfig::default()).await;
    table.backend.inject_failure("tables/trips/.timeline/");

    let err = session
        .start_delta_commit(&batch(1, "a"), table.clock.now())
        .await
        .unwrap_err();
    assert!(matches!(err, TimelineError::Storage(_)));
    assert!(table.writer.ingests().is_empty());

    table.backend.clear_failures();
    session
        .start_delta_commit(&batch(1, "a"), table.clock.now())
        .await
        .unwrap();
}
