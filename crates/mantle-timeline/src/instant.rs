//! Instants: timestamped, typed, stateful timeline markers.

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TimelineError};

/// `chrono` format of generated instant times (UTC, millisecond precision).
pub const INSTANT_TIME_FORMAT: &str = "%Y%m%d%H%M%S%3f";

const SECONDS_FORMAT: &str = "%Y%m%d%H%M%S";

/// Lexically sortable instant timestamp.
///
/// Generated timestamps are 17 ASCII digits (`yyyyMMddHHmmssSSS`), so lexical
/// order is chronological order. Caller-supplied identifiers such as `"001"`
/// are accepted as long as they are ASCII alphanumeric; they sort lexically but
/// carry no wall-clock meaning.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstantTime(String);

impl InstantTime {
    /// Parses an instant time.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::InvalidInstantTime`] if `value` is empty or
    /// contains anything other than ASCII letters and digits.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(TimelineError::InvalidInstantTime {
                value,
                message: "must not be empty".to_string(),
            });
        }
        if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(TimelineError::InvalidInstantTime {
                value,
                message: "must be ASCII alphanumeric".to_string(),
            });
        }
        Ok(Self(value))
    }

    /// Formats a wall-clock time as an instant time.
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.format(INSTANT_TIME_FORMAT).to_string())
    }

    /// Returns the wall-clock time this instant time encodes, if any.
    ///
    /// Accepts the millisecond format and the older second-precision
    /// `yyyyMMddHHmmss` form.
    #[must_use]
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let s = self.0.as_str();
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let (seconds, millis) = match s.len() {
            17 => (&s[..14], s[14..].parse::<i64>().ok()?),
            14 => (s, 0),
            _ => return None,
        };
        let naive = NaiveDateTime::parse_from_str(seconds, SECONDS_FORMAT).ok()?;
        Some(naive.and_utc() + ChronoDuration::milliseconds(millis))
    }

    /// Smallest instant time that sorts after this one.
    ///
    /// Used when the last instant has no wall-clock meaning, so a generated
    /// timestamp cannot be bumped past it.
    #[must_use]
    pub fn successor(&self) -> Self {
        Self(format!("{}0", self.0))
    }

    /// Returns the raw string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InstantTime {
    type Error = TimelineError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<&str> for InstantTime {
    type Error = TimelineError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<InstantTime> for String {
    fn from(value: InstantTime) -> Self {
        value.0
    }
}

impl fmt::Display for InstantTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Incremental write of records into delta logs.
    DeltaCommit,
    /// Scheduled or running merge of delta logs into base files.
    Compaction,
    /// Completed commit; completed compactions are recorded under this action.
    Commit,
}

impl Action {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::DeltaCommit => "deltacommit",
            Self::Compaction => "compaction",
            Self::Commit => "commit",
        }
    }

    /// Action under which an instant of this action is recorded once completed.
    #[must_use]
    pub const fn completed_action(self) -> Self {
        match self {
            Self::Compaction | Self::Commit => Self::Commit,
            Self::DeltaCommit => Self::DeltaCommit,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Lifecycle state of an instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Work has been decided but not started.
    Requested,
    /// Work is executing (or was abandoned by a crash).
    Inflight,
    /// Work finished successfully. Terminal.
    Completed,
}

impl State {
    /// The only state reachable from this one, if any.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Requested => Some(Self::Inflight),
            Self::Inflight => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }

    /// Returns true for REQUESTED and INFLIGHT.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        !matches!(self, Self::Completed)
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Inflight => "inflight",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One point in the timeline.
///
/// Immutable: a transition yields a new `Instant` for the same timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instant {
    timestamp: InstantTime,
    action: Action,
    state: State,
}

impl Instant {
    /// Creates an instant.
    #[must_use]
    pub fn new(timestamp: InstantTime, action: Action, state: State) -> Self {
        Self {
            timestamp,
            action,
            state,
        }
    }

    /// Creates a REQUESTED instant.
    #[must_use]
    pub fn requested(timestamp: InstantTime, action: Action) -> Self {
        Self::new(timestamp, action, State::Requested)
    }

    /// Timestamp identifying this instant.
    #[must_use]
    pub fn timestamp(&self) -> &InstantTime {
        &self.timestamp
    }

    /// Action recorded for this instant.
    #[must_use]
    pub fn action(&self) -> Action {
        self.action
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns true once the instant has completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.state == State::Completed
    }

    /// The instant this one becomes after moving to `state`.
    ///
    /// Completing a compaction records it under [`Action::Commit`].
    #[must_use]
    pub(crate) fn transitioned(&self, state: State) -> Self {
        let action = if state == State::Completed {
            self.action.completed_action()
        } else {
            self.action
        };
        Self::new(self.timestamp.clone(), action, state)
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}__{}__{}]", self.timestamp, self.action, self.state)
    }
}

/// Selects instants by action and state.
///
/// An empty selector (the default) matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstantFilter {
    actions: Option<Vec<Action>>,
    states: Option<Vec<State>>,
}

impl InstantFilter {
    /// Matches every instant.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Delta commits, compactions and commits in any state.
    #[must_use]
    pub fn commits_and_compaction() -> Self {
        Self::all().with_actions([Action::DeltaCommit, Action::Compaction, Action::Commit])
    }

    /// Delta commits in any state.
    #[must_use]
    pub fn delta_commits() -> Self {
        Self::all().with_actions([Action::DeltaCommit])
    }

    /// Commits (completed compactions) in any state.
    #[must_use]
    pub fn commits() -> Self {
        Self::all().with_actions([Action::Commit])
    }

    /// Compactions that have not completed yet.
    #[must_use]
    pub fn pending_compaction() -> Self {
        Self::all()
            .with_actions([Action::Compaction])
            .with_states([State::Requested, State::Inflight])
    }

    /// Restricts to the given actions.
    #[must_use]
    pub fn with_actions(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.actions = Some(actions.into_iter().collect());
        self
    }

    /// Restricts to the given states.
    #[must_use]
    pub fn with_states(mut self, states: impl IntoIterator<Item = State>) -> Self {
        self.states = Some(states.into_iter().collect());
        self
    }

    /// Restricts to completed instants.
    #[must_use]
    pub fn completed(self) -> Self {
        self.with_states([State::Completed])
    }

    /// Returns true if `instant` is selected.
    #[must_use]
    pub fn matches(&self, instant: &Instant) -> bool {
        self.actions
            .as_ref()
            .is_none_or(|actions| actions.contains(&instant.action()))
            && self
                .states
                .as_ref()
                .is_none_or(|states| states.contains(&instant.state()))
    }
}
