//! Compaction configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TimelineError};

/// Environment variable toggling inline compaction.
pub const ENV_INLINE_COMPACTION: &str = "MANTLE_INLINE_COMPACTION";
/// Environment variable for the delta commit count threshold.
pub const ENV_MAX_DELTA_COMMITS: &str = "MANTLE_COMPACTION_MAX_DELTA_COMMITS";
/// Environment variable for the elapsed time threshold, in seconds.
pub const ENV_MAX_DELTA_SECONDS: &str = "MANTLE_COMPACTION_MAX_DELTA_SECONDS";

/// Thresholds and mode for compaction scheduling.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use mantle_timeline::CompactionConfig;
///
/// let config = CompactionConfig::default()
///     .with_inline_compaction(true)
///     .with_max_delta_commits(3)
///     .with_max_delta_time(Duration::from_secs(60));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionConfig {
    /// Execute compactions synchronously after each delta commit.
    ///
    /// When false the coordinator only schedules (REQUESTED) new compactions.
    #[serde(default)]
    pub inline_compaction: bool,

    /// Count rule: compact once this many delta commits completed since the
    /// last compaction.
    pub max_num_delta_commits_before_compaction: u32,

    /// Time rule: compact once this much time passed since the last
    /// compaction (or table creation).
    #[serde(with = "duration_secs", rename = "maxDeltaSecondsBeforeCompaction")]
    pub max_delta_time_before_compaction: Duration,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            inline_compaction: false,
            max_num_delta_commits_before_compaction: 5,
            max_delta_time_before_compaction: Duration::from_secs(60 * 60),
        }
    }
}

impl CompactionConfig {
    /// Sets inline compaction.
    #[must_use]
    pub fn with_inline_compaction(mut self, inline: bool) -> Self {
        self.inline_compaction = inline;
        self
    }

    /// Sets the count-rule threshold.
    #[must_use]
    pub fn with_max_delta_commits(mut self, commits: u32) -> Self {
        self.max_num_delta_commits_before_compaction = commits;
        self
    }

    /// Sets the time-rule threshold.
    #[must_use]
    pub fn with_max_delta_time(mut self, elapsed: Duration) -> Self {
        self.max_delta_time_before_compaction = elapsed;
        self
    }

    /// Rejects non-positive thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`TimelineError::InvalidConfig`] if either threshold is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_num_delta_commits_before_compaction == 0 {
            return Err(TimelineError::invalid_config(
                "maxNumDeltaCommitsBeforeCompaction must be at least 1",
            ));
        }
        if self.max_delta_time_before_compaction.is_zero() {
            return Err(TimelineError::invalid_config(
                "maxDeltaSecondsBeforeCompaction must be at least 1",
            ));
        }
        Ok(())
    }

    /// Loads configuration from environment variables over the defaults.
    ///
    /// - `MANTLE_INLINE_COMPACTION` (`true`/`false`/`1`/`0`)
    /// - `MANTLE_COMPACTION_MAX_DELTA_COMMITS` (u32)
    /// - `MANTLE_COMPACTION_MAX_DELTA_SECONDS` (u64)
    ///
    /// Empty or whitespace-only values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result fails
    /// [`Self::validate`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        let get = |name: &str| {
            lookup(name).and_then(|v| {
                let trimmed = v.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
        };

        if let Some(v) = get(ENV_INLINE_COMPACTION) {
            config.inline_compaction = parse_bool(ENV_INLINE_COMPACTION, &v)?;
        }
        if let Some(v) = get(ENV_MAX_DELTA_COMMITS) {
            config.max_num_delta_commits_before_compaction = v.parse::<u32>().map_err(|e| {
                TimelineError::invalid_config(format!("{ENV_MAX_DELTA_COMMITS} must be a u32: {e}"))
            })?;
        }
        if let Some(v) = get(ENV_MAX_DELTA_SECONDS) {
            let secs = v.parse::<u64>().map_err(|e| {
                TimelineError::invalid_config(format!("{ENV_MAX_DELTA_SECONDS} must be a u64: {e}"))
            })?;
            config.max_delta_time_before_compaction = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(TimelineError::invalid_config(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
