//! Error types for `mantle-timeline`.

use crate::instant::{Action, InstantTime, State};

/// Result type for timeline operations.
pub type Result<T> = std::result::Result<T, TimelineError>;

/// Timeline and compaction errors.
#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    /// An instant was appended with a timestamp not strictly greater than the last one.
    ///
    /// Indicates a clock or sequencing bug upstream; never retried.
    #[error("out of order instant {timestamp}: last appended instant is {last}")]
    OutOfOrderInstant {
        /// Timestamp that was rejected.
        timestamp: InstantTime,
        /// Last timestamp present on the timeline.
        last: InstantTime,
    },

    /// A state transition did not match the persisted predecessor state.
    ///
    /// Callers must `refresh()` and re-evaluate rather than retry blindly.
    #[error(
        "invalid transition for {action} instant {timestamp}: expected {expected}, found {actual}"
    )]
    InvalidTransition {
        /// Timestamp of the instant.
        timestamp: InstantTime,
        /// Action of the instant as known by the caller.
        action: Action,
        /// The transition the caller asked for (`from -> to`).
        expected: String,
        /// What is actually persisted.
        actual: String,
    },

    /// No instant exists for the timestamp.
    #[error("instant not found: {timestamp}")]
    InstantNotFound {
        /// Timestamp that was looked up.
        timestamp: InstantTime,
    },

    /// A compaction is already outstanding; a new one cannot be scheduled.
    #[error("compaction {pending} is still {state}; cannot schedule another")]
    CompactionAlreadyPending {
        /// Timestamp of the outstanding compaction.
        pending: InstantTime,
        /// Its current state.
        state: State,
    },

    /// A timestamp string is not a valid instant time.
    #[error("invalid instant time '{value}': {message}")]
    InvalidInstantTime {
        /// Rejected value.
        value: String,
        /// Why it was rejected.
        message: String,
    },

    /// Compaction configuration is invalid.
    #[error("invalid compaction config: {message}")]
    InvalidConfig {
        /// Human-readable details.
        message: String,
    },

    /// The writer collaborator failed to ingest or merge.
    ///
    /// The associated instant stays at its last recorded state.
    #[error("execution failed: {message}")]
    Execution {
        /// Human-readable details.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A persisted marker could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Human-readable serialization details.
        message: String,
    },

    /// A storage operation failed.
    #[error(transparent)]
    Storage(#[from] mantle_core::Error),
}

impl TimelineError {
    /// Creates an execution error.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an execution error with a source cause.
    #[must_use]
    pub fn execution_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Execution {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an invalid config error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub(crate) fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_transition(
        timestamp: &InstantTime,
        action: Action,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            timestamp: timestamp.clone(),
            action,
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Wraps a writer failure as [`TimelineError::Execution`], keeping
    /// execution errors as they are.
    pub(crate) fn into_execution(self, context: impl Into<String>) -> Self {
        match self {
            err @ Self::Execution { .. } => err,
            other => Self::execution_with_source(context, other),
        }
    }

    /// Returns true if the caller should refresh the timeline and re-evaluate.
    #[must_use]
    pub fn is_stale_view(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::CompactionAlreadyPending { .. }
        )
    }
}
