//! Error types and result aliases for Mantle.
//!
//! Errors here cover the storage and identifier layer shared by every crate.
//! Domain crates wrap them (see `mantle_timeline::TimelineError`).

/// The result type used throughout Mantle.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Mantle core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an internal error for a poisoned lock.
    #[must_use]
    pub fn lock_poisoned() -> Self {
        Self::Internal {
            message: "lock poisoned".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_keeps_source() {
        let io = std::io::Error::other("disk gone");
        let err = Error::storage_with_source("write marker", io);
        let source = std::error::Error::source(&err).expect("source should be set");
        assert_eq!(source.to_string(), "disk gone");
        assert_eq!(err.to_string(), "storage error: write marker");
    }
}
