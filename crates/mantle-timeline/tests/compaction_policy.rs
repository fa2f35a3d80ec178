//! Compaction policy decisions over persisted timelines.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mantle_test_utils::{TestTable, ts};
use mantle_timeline::{
    Action, CompactionConfig, CompactionDecision, Instant, InstantDetails, InstantTime, State,
    TimelineStore, TriggerReason, decide, policy,
};

async fn complete(store: &TimelineStore, requested: Instant) -> Instant {
    let inflight = store.transition(&requested, State::Inflight).await.unwrap();
    store.transition(&inflight, State::Completed).await.unwrap()
}

async fn delta_commit(store: &TimelineStore, timestamp: InstantTime) -> Instant {
    let requested = store
        .append(Instant::requested(timestamp, Action::DeltaCommit))
        .await
        .unwrap();
    complete(store, requested).await
}

async fn compaction(store: &TimelineStore, timestamp: InstantTime) -> Instant {
    let requested = store
        .append(Instant::requested(timestamp, Action::Compaction))
        .await
        .unwrap();
    complete(store, requested).await
}

fn at(base: DateTime<Utc>, seconds: i64) -> InstantTime {
    InstantTime::from_datetime(base + ChronoDuration::seconds(seconds))
}

fn count_only(max_delta_commits: u32) -> CompactionConfig {
    CompactionConfig::default().with_max_delta_commits(max_delta_commits)
}

fn trigger(reason: TriggerReason) -> CompactionDecision {
    CompactionDecision::TriggerNow { reason }
}

#[tokio::test]
async fn count_rule_fires_exactly_at_threshold() {
    let table = TestTable::new();
    let store = table.open_store().await;
    let config = count_only(3);

    for t in ["001", "002"] {
        delta_commit(&store, ts(t)).await;
    }
    let timeline = store.timeline().unwrap();
    assert_eq!(decide(&timeline, &config, table.clock.now()), CompactionDecision::NoAction);

    delta_commit(&store, ts("003")).await;
    let timeline = store.timeline().unwrap();
    assert_eq!(
        decide(&timeline, &config, table.clock.now()),
        trigger(TriggerReason::DeltaCommits { count: 3 })
    );
}

#[tokio::test]
async fn count_restarts_after_completed_compaction() {
    let table = TestTable::new();
    let store = table.open_store().await;
    let config = count_only(2);

    for t in ["001", "002", "003"] {
        delta_commit(&store, ts(t)).await;
    }
    compaction(&store, ts("004")).await;
    delta_commit(&store, ts("005")).await;

    let timeline = store.timeline().unwrap();
    assert_eq!(policy::delta_commits_since_last_compaction(&timeline), 1);
    assert_eq!(decide(&timeline, &config, table.clock.now()), CompactionDecision::NoAction);

    delta_commit(&store, ts("006")).await;
    let timeline = store.timeline().unwrap();
    assert_eq!(
        decide(&timeline, &config, table.clock.now()),
        trigger(TriggerReason::DeltaCommits { count: 2 })
    );
}

#[tokio::test]
async fn unfinished_delta_commits_are_not_counted() {
    let table = TestTable::new();
    let store = table.open_store().await;

    delta_commit(&store, ts("001")).await;
    let requested = store
        .append(Instant::requested(ts("002"), Action::DeltaCommit))
        .await
        .unwrap();
    store.transition(&requested, State::Inflight).await.unwrap();
    store
        .append(Instant::requested(ts("003"), Action::DeltaCommit))
        .await
        .unwrap();

    let timeline = store.timeline().unwrap();
    assert_eq!(policy::delta_commits_since_last_compaction(&timeline), 1);
    assert_eq!(
        decide(&timeline, &count_only(2), table.clock.now()),
        CompactionDecision::NoAction
    );
}

#[tokio::test]
async fn outstanding_compaction_suppresses_new_decisions() {
    let table = TestTable::new();
    let store = table.open_store().await;
    let config = count_only(1);

    for t in ["001", "002"] {
        delta_commit(&store, ts(t)).await;
    }
    let requested = store
        .append(Instant::requested(ts("003"), Action::Compaction))
        .await
        .unwrap();
    delta_commit(&store, ts("004")).await;

    let timeline = store.timeline().unwrap();
    assert_eq!(decide(&timeline, &config, table.clock.now()), CompactionDecision::NoAction);

    store.transition(&requested, State::Inflight).await.unwrap();
    let timeline = store.timeline().unwrap();
    assert_eq!(decide(&timeline, &config, table.clock.now()), CompactionDecision::NoAction);
}

#[tokio::test]
async fn time_rule_counts_from_table_creation() {
    let table = TestTable::new();
    let store = table.open_store().await;
    let base = table.clock.now();
    let config = CompactionConfig::default()
        .with_max_delta_commits(5)
        .with_max_delta_time(Duration::from_secs(10));

    delta_commit(&store, at(base, 0)).await;
    let timeline = store.timeline().unwrap();

    let now = base + ChronoDuration::seconds(9);
    assert_eq!(decide(&timeline, &config, now), CompactionDecision::NoAction);

    let now = base + ChronoDuration::seconds(10);
    assert_eq!(
        decide(&timeline, &config, now),
        trigger(TriggerReason::ElapsedTime {
            elapsed: Duration::from_secs(10)
        })
    );
}

#[tokio::test]
async fn time_rule_counts_from_last_completed_compaction() {
    let table = TestTable::new();
    let store = table.open_store().await;
    let base = table.clock.now();
    let config = CompactionConfig::default().with_max_delta_time(Duration::from_secs(10));

    delta_commit(&store, at(base, 0)).await;
    compaction(&store, at(base, 5)).await;
    let timeline = store.timeline().unwrap();

    let now = base + ChronoDuration::seconds(12);
    assert_eq!(
        policy::elapsed_since_last_compaction(&timeline, now),
        Some(Duration::from_secs(7))
    );
    assert_eq!(decide(&timeline, &config, now), CompactionDecision::NoAction);

    let now = base + ChronoDuration::seconds(15);
    assert!(decide(&timeline, &config, now).should_compact());
}

#[tokio::test]
async fn both_rules_firing_reports_both() {
    let table = TestTable::new();
    let store = table.open_store().await;
    let base = table.clock.now();
    let config = CompactionConfig::default()
        .with_max_delta_commits(2)
        .with_max_delta_time(Duration::from_secs(10));

    delta_commit(&store, at(base, 0)).await;
    delta_commit(&store, at(base, 1)).await;
    let timeline = store.timeline().unwrap();

    assert_eq!(
        decide(&timeline, &config, base + ChronoDuration::seconds(10)),
        trigger(TriggerReason::Both {
            count: 2,
            elapsed: Duration::from_secs(10)
        })
    );
}

#[tokio::test]
async fn caller_supplied_creation_is_timed_from_its_request() {
    let table = TestTable::new();
    let store = table.open_store().await;
    let base = table.clock.now();
    let config = CompactionConfig::default().with_max_delta_time(Duration::from_secs(10));

    let requested = store
        .append_at(
            Instant::requested(ts("000"), Action::DeltaCommit),
            InstantDetails::Empty,
            base,
        )
        .await
        .unwrap();
    complete(&store, requested).await;

    let timeline = table.open_store().await.timeline().unwrap();
    assert_eq!(
        decide(&timeline, &config, base + ChronoDuration::seconds(10)),
        trigger(TriggerReason::ElapsedTime {
            elapsed: Duration::from_secs(10)
        })
    );
    assert_eq!(
        decide(&timeline, &config, base + ChronoDuration::seconds(9)),
        CompactionDecision::NoAction
    );
}

#[tokio::test]
async fn opaque_reference_without_request_time_never_fires_time_rule() {
    let table = TestTable::new();
    let store = table.open_store().await;
    let config = CompactionConfig::default().with_max_delta_time(Duration::from_secs(1));

    delta_commit(&store, ts("000")).await;
    let timeline = store.timeline().unwrap();
    let later = table.clock.now() + ChronoDuration::days(365);

    assert_eq!(policy::elapsed_since_last_compaction(&timeline, later), None);
    assert_eq!(decide(&timeline, &config, later), CompactionDecision::NoAction);
}

#[tokio::test]
async fn reference_in_the_future_is_ignored() {
    let table = TestTable::new();
    let store = table.open_store().await;
    let base = table.clock.now();
    let config = CompactionConfig::default().with_max_delta_time(Duration::from_secs(1));

    delta_commit(&store, at(base, 60)).await;
    let timeline = store.timeline().unwrap();

    assert_eq!(policy::elapsed_since_last_compaction(&timeline, base), None);
    assert_eq!(decide(&timeline, &config, base), CompactionDecision::NoAction);
}
