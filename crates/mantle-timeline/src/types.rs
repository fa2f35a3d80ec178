//! Shared timeline types (records, plans, commit metadata, persisted markers).

use std::collections::BTreeSet;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instant::{Action, Instant, InstantTime, State};

/// Identifier of a file group (a base file plus its delta logs).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileGroupId(String);

impl FileGroupId {
    /// Creates a file group id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single record handed to the writer collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record key.
    pub key: String,
    /// Partition the record belongs to.
    pub partition_path: String,
    /// Encoded record payload; opaque to the timeline.
    pub payload: Bytes,
}

impl Record {
    /// Creates a record.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        partition_path: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            key: key.into(),
            partition_path: partition_path.into(),
            payload: payload.into(),
        }
    }
}

/// Records ingested by one delta commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    records: Vec<Record>,
}

impl WriteBatch {
    /// Creates a batch from records.
    #[must_use]
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Records in ingestion order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<Record> for WriteBatch {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// What the writer collaborator reports after ingesting a delta commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    /// File groups that received delta log blocks.
    pub file_groups: Vec<FileGroupId>,
    /// Number of records written.
    pub records_written: u64,
}

/// File groups targeted by one compaction instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionPlan {
    /// Completed delta commits whose logs are merged by this plan.
    pub delta_commits: Vec<InstantTime>,
    /// Target file groups, sorted and de-duplicated.
    pub file_groups: Vec<FileGroupId>,
}

impl CompactionPlan {
    /// Builds a plan from the delta commits it covers.
    #[must_use]
    pub fn from_delta_commits<'a>(
        delta_commits: impl IntoIterator<Item = (&'a InstantTime, &'a CommitMetadata)>,
    ) -> Self {
        let mut commits = Vec::new();
        let mut file_groups = BTreeSet::new();
        for (timestamp, metadata) in delta_commits {
            commits.push(timestamp.clone());
            file_groups.extend(metadata.file_groups.iter().cloned());
        }
        Self {
            delta_commits: commits,
            file_groups: file_groups.into_iter().collect(),
        }
    }

    /// Returns true if the plan targets no file group.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_groups.is_empty()
    }
}

/// Payload persisted alongside an instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstantDetails {
    /// Nothing recorded.
    #[default]
    Empty,
    /// Plan of a compaction; kept after the compaction completes as a commit.
    CompactionPlan(CompactionPlan),
    /// Metadata of a completed delta commit.
    CommitMetadata(CommitMetadata),
}

impl InstantDetails {
    /// Returns the compaction plan, if this is one.
    #[must_use]
    pub fn compaction_plan(&self) -> Option<&CompactionPlan> {
        match self {
            Self::CompactionPlan(plan) => Some(plan),
            _ => None,
        }
    }

    /// Returns the commit metadata, if this is one.
    #[must_use]
    pub fn commit_metadata(&self) -> Option<&CommitMetadata> {
        match self {
            Self::CommitMetadata(metadata) => Some(metadata),
            _ => None,
        }
    }
}

/// Marker stored as JSON at `.timeline/{timestamp}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantMarker {
    /// Instant timestamp.
    pub timestamp: InstantTime,
    /// Recorded action.
    pub action: Action,
    /// Recorded state.
    pub state: State,
    /// Attached payload.
    #[serde(default)]
    pub details: InstantDetails,
    /// Wall-clock time the instant was requested, when the writer supplied it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_at: Option<DateTime<Utc>>,
}

impl InstantMarker {
    /// Creates a marker for `instant`.
    #[must_use]
    pub fn new(instant: &Instant, details: InstantDetails) -> Self {
        Self {
            timestamp: instant.timestamp().clone(),
            action: instant.action(),
            state: instant.state(),
            details,
            requested_at: None,
        }
    }

    /// Records when the instant was requested.
    #[must_use]
    pub fn with_requested_at(mut self, requested_at: Option<DateTime<Utc>>) -> Self {
        self.requested_at = requested_at;
        self
    }

    /// The instant this marker records.
    #[must_use]
    pub fn instant(&self) -> Instant {
        Instant::new(self.timestamp.clone(), self.action, self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> InstantTime {
        InstantTime::new(s).unwrap()
    }

    #[test]
    fn plan_unions_file_groups_in_sorted_order() {
        let first = CommitMetadata {
            file_groups: vec![FileGroupId::new("fg-2"), FileGroupId::new("fg-1")],
            records_written: 10,
        };
        let second = CommitMetadata {
            file_groups: vec![FileGroupId::new("fg-1"), FileGroupId::new("fg-3")],
            records_written: 5,
        };
        let (t1, t2) = (ts("001"), ts("002"));

        let plan = CompactionPlan::from_delta_commits([(&t1, &first), (&t2, &second)]);

        assert_eq!(plan.delta_commits, vec![t1, t2]);
        assert_eq!(
            plan.file_groups,
            vec![
                FileGroupId::new("fg-1"),
                FileGroupId::new("fg-2"),
                FileGroupId::new("fg-3")
            ]
        );
        assert!(!plan.is_empty());
        assert!(CompactionPlan::default().is_empty());
    }

    #[test]
    fn marker_json_layout() {
        let instant = Instant::new(ts("002"), Action::Commit, State::Completed);
        let marker = InstantMarker::new(
            &instant,
            InstantDetails::CompactionPlan(CompactionPlan {
                delta_commits: vec![ts("000"), ts("001")],
                file_groups: vec![FileGroupId::new("fg-1")],
            }),
        );

        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["timestamp"], "002");
        assert_eq!(json["action"], "commit");
        assert_eq!(json["state"], "completed");
        assert_eq!(json["details"]["kind"], "compaction_plan");
        assert_eq!(json["details"]["file_groups"][0], "fg-1");

        assert!(json.get("requested_at").is_none());

        let decoded: InstantMarker = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, marker);
        assert_eq!(decoded.instant(), instant);
    }

    #[test]
    fn marker_keeps_request_time() {
        use chrono::TimeZone;

        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        let instant = Instant::requested(ts("000"), Action::DeltaCommit);
        let marker = InstantMarker::new(&instant, InstantDetails::Empty).with_requested_at(Some(at));

        let json = serde_json::to_value(&marker).unwrap();
        assert_eq!(json["requested_at"], "2024-01-01T00:00:10Z");
        let decoded: InstantMarker = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.requested_at, Some(at));
    }

    #[test]
    fn marker_rejects_invalid_timestamp() {
        let json = r#"{"timestamp":"../x","action":"commit","state":"completed"}"#;
        assert!(serde_json::from_str::<InstantMarker>(json).is_err());
    }

    #[test]
    fn batch_collects_records() {
        let batch: WriteBatch = (0..3)
            .map(|i| Record::new(format!("key-{i}"), "2024/01/01", format!("{{\"v\":{i}}}")))
            .collect();
        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());
        assert_eq!(batch.records()[2].key, "key-2");
    }
}
