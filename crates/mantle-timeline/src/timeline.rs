//! Timeline store: the ordered, append-only collection of instants.
//!
//! Markers are persisted one per timestamp at `.timeline/{timestamp}.json`
//! inside the table scope. The only mutators are:
//!
//! - [`TimelineStore::append`]: create-if-absent of a REQUESTED marker
//! - [`TimelineStore::transition`]: compare-and-swap of an existing marker
//!
//! The in-memory view reflects this store's own writes immediately. Writes made
//! by another session become visible after [`TimelineStore::refresh`]; a stale
//! view can only cause a rejected transition, never a lost update.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mantle_core::TableStorage;
use mantle_core::storage::{WritePrecondition, WriteResult};
use tracing::{debug, warn};

use crate::error::{Result, TimelineError};
use crate::instant::{Action, Instant, InstantFilter, InstantTime, State};
use crate::metrics;
use crate::types::{InstantDetails, InstantMarker};

#[derive(Debug, Clone)]
struct TimelineEntry {
    instant: Instant,
    details: InstantDetails,
    requested_at: Option<DateTime<Utc>>,
}

/// Immutable, timestamp-ordered snapshot of a timeline.
///
/// Cheap to clone. Queries on a snapshot never observe later writes; take a new
/// snapshot (or use the store's query methods) to see the current view.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Arc<Vec<TimelineEntry>>,
}

impl Timeline {
    fn from_entries(mut entries: Vec<TimelineEntry>) -> Self {
        entries.sort_by(|a, b| a.instant.timestamp().cmp(b.instant.timestamp()));
        Self {
            entries: Arc::new(entries),
        }
    }

    fn position(&self, timestamp: &InstantTime) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| entry.instant.timestamp().cmp(timestamp))
    }

    fn upsert(&mut self, instant: Instant, marker: InstantMarker) {
        let position = self.position(instant.timestamp());
        let entries = Arc::make_mut(&mut self.entries);
        let entry = TimelineEntry {
            instant,
            details: marker.details,
            requested_at: marker.requested_at,
        };
        match position {
            Ok(index) => entries[index] = entry,
            Err(index) => entries.insert(index, entry),
        }
    }

    /// Every instant in timestamp order.
    pub fn instants(&self) -> impl Iterator<Item = &Instant> + '_ {
        self.entries.iter().map(|entry| &entry.instant)
    }

    /// Instants selected by `filter`, in timestamp order.
    ///
    /// Lazy and finite; call again to restart.
    pub fn filter<'a>(&'a self, filter: &'a InstantFilter) -> impl Iterator<Item = &'a Instant> + 'a {
        self.instants().filter(move |instant| filter.matches(instant))
    }

    /// First instant selected by `filter`.
    #[must_use]
    pub fn first_instant(&self, filter: &InstantFilter) -> Option<&Instant> {
        self.instants().find(|instant| filter.matches(instant))
    }

    /// Last instant selected by `filter`.
    #[must_use]
    pub fn last_instant(&self, filter: &InstantFilter) -> Option<&Instant> {
        self.entries
            .iter()
            .rev()
            .map(|entry| &entry.instant)
            .find(|instant| filter.matches(instant))
    }

    /// Number of instants selected by `filter`.
    #[must_use]
    pub fn count_instants(&self, filter: &InstantFilter) -> usize {
        self.filter(filter).count()
    }

    /// Total number of instants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no instant was ever appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instant recorded for `timestamp`.
    #[must_use]
    pub fn get(&self, timestamp: &InstantTime) -> Option<&Instant> {
        self.position(timestamp)
            .ok()
            .map(|index| &self.entries[index].instant)
    }

    /// Payload recorded for `timestamp`.
    #[must_use]
    pub fn details(&self, timestamp: &InstantTime) -> Option<&InstantDetails> {
        self.position(timestamp)
            .ok()
            .map(|index| &self.entries[index].details)
    }

    /// Wall-clock time `timestamp` was requested at, if the writer recorded it.
    #[must_use]
    pub fn requested_at(&self, timestamp: &InstantTime) -> Option<DateTime<Utc>> {
        self.position(timestamp)
            .ok()
            .and_then(|index| self.entries[index].requested_at)
    }

    /// The outstanding (REQUESTED or INFLIGHT) compaction, if any.
    #[must_use]
    pub fn pending_compaction(&self) -> Option<&Instant> {
        self.first_instant(&InstantFilter::pending_compaction())
    }

    /// The last completed compaction, recorded under [`Action::Commit`].
    #[must_use]
    pub fn last_completed_compaction(&self) -> Option<&Instant> {
        self.last_instant(&InstantFilter::commits().completed())
    }

    /// Completed delta commits strictly after `after` (all of them if `None`).
    pub fn completed_delta_commits_after<'a>(
        &'a self,
        after: Option<&'a InstantTime>,
    ) -> impl Iterator<Item = &'a Instant> + 'a {
        self.instants().filter(move |instant| {
            instant.action() == Action::DeltaCommit
                && instant.is_completed()
                && after.is_none_or(|after| instant.timestamp() > after)
        })
    }
}

/// Owning, restartable iterator over the instants selected by a filter.
///
/// Created by [`TimelineStore::filter`].
#[derive(Debug, Clone)]
pub struct FilteredInstants {
    timeline: Timeline,
    filter: InstantFilter,
    next: usize,
}

impl Iterator for FilteredInstants {
    type Item = Instant;

    fn next(&mut self) -> Option<Instant> {
        while let Some(entry) = self.timeline.entries.get(self.next) {
            self.next += 1;
            if self.filter.matches(&entry.instant) {
                return Some(entry.instant.clone());
            }
        }
        None
    }
}

/// Durable timeline of one table.
pub struct TimelineStore {
    storage: TableStorage,
    view: RwLock<Timeline>,
}

impl std::fmt::Debug for TimelineStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineStore")
            .field("table", &self.storage.table())
            .finish_non_exhaustive()
    }
}

impl TimelineStore {
    /// Opens the timeline of the table and loads its persisted markers.
    ///
    /// # Errors
    ///
    /// Returns an error if markers cannot be listed, read or decoded.
    pub async fn open(storage: TableStorage) -> Result<Self> {
        let store = Self {
            storage,
            view: RwLock::new(Timeline::default()),
        };
        store.refresh().await?;
        Ok(store)
    }

    /// Table this timeline belongs to.
    #[must_use]
    pub fn table(&self) -> &str {
        self.storage.table()
    }

    fn read_view(&self) -> Result<RwLockReadGuard<'_, Timeline>> {
        self.view
            .read()
            .map_err(|_| mantle_core::Error::lock_poisoned().into())
    }

    fn write_view(&self) -> Result<RwLockWriteGuard<'_, Timeline>> {
        self.view
            .write()
            .map_err(|_| mantle_core::Error::lock_poisoned().into())
    }

    /// Reloads the in-memory view from persisted markers.
    ///
    /// Required before any decision that must observe writes made by another
    /// session.
    ///
    /// # Errors
    ///
    /// Returns an error if markers cannot be listed, read or decoded.
    pub async fn refresh(&self) -> Result<()> {
        let listed = self.storage.list(&TableStorage::timeline_prefix()).await?;

        let mut entries = Vec::with_capacity(listed.len());
        for (path, _version) in listed {
            let Some(stem) = path.file_name().strip_suffix(".json") else {
                continue;
            };
            let marker = self.read_marker(path.as_str()).await?;
            if marker.timestamp.as_str() != stem {
                return Err(TimelineError::serialization(format!(
                    "marker '{path}' records timestamp {}",
                    marker.timestamp
                )));
            }
            entries.push(TimelineEntry {
                instant: marker.instant(),
                details: marker.details,
                requested_at: marker.requested_at,
            });
        }

        let timeline = Timeline::from_entries(entries);
        debug!(
            table = self.table(),
            instants = timeline.len(),
            "refreshed timeline"
        );
        *self.write_view()? = timeline;
        Ok(())
    }

    /// Snapshot of the current in-memory view.
    ///
    /// # Errors
    ///
    /// Returns an error if the view lock is poisoned.
    pub fn timeline(&self) -> Result<Timeline> {
        Ok(self.read_view()?.clone())
    }

    /// Instants selected by `filter` in timestamp order.
    ///
    /// The iterator is lazy and finite. It walks the view as of this call; call
    /// again to observe later appends and transitions.
    ///
    /// # Errors
    ///
    /// Returns an error if the view lock is poisoned.
    pub fn filter(&self, filter: InstantFilter) -> Result<FilteredInstants> {
        Ok(FilteredInstants {
            timeline: self.timeline()?,
            filter,
            next: 0,
        })
    }

    /// First instant selected by `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the view lock is poisoned.
    pub fn first_instant(&self, filter: &InstantFilter) -> Result<Option<Instant>> {
        Ok(self.read_view()?.first_instant(filter).cloned())
    }

    /// Last instant selected by `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the view lock is poisoned.
    pub fn last_instant(&self, filter: &InstantFilter) -> Result<Option<Instant>> {
        Ok(self.read_view()?.last_instant(filter).cloned())
    }

    /// Number of instants selected by `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the view lock is poisoned.
    pub fn count_instants(&self, filter: &InstantFilter) -> Result<usize> {
        Ok(self.read_view()?.count_instants(filter))
    }

    /// Generates a timestamp for a new instant at `now`.
    ///
    /// If the wall clock has not moved past the last instant, the result is
    /// bumped to one millisecond after it so appends stay strictly increasing.
    /// A last instant without wall-clock meaning is followed by its
    /// [`InstantTime::successor`].
    ///
    /// # Errors
    ///
    /// Returns an error if the view lock is poisoned.
    pub fn new_instant_time(&self, now: DateTime<Utc>) -> Result<InstantTime> {
        let candidate = InstantTime::from_datetime(now);
        let view = self.read_view()?;
        let Some(last) = view.last_instant(&InstantFilter::all()) else {
            return Ok(candidate);
        };
        if candidate > *last.timestamp() {
            return Ok(candidate);
        }
        Ok(match last.timestamp().to_datetime() {
            Some(at) => InstantTime::from_datetime(at + ChronoDuration::milliseconds(1)),
            None => last.timestamp().successor(),
        })
    }

    /// Appends a new REQUESTED instant without a payload.
    ///
    /// # Errors
    ///
    /// See [`Self::append_with`].
    pub async fn append(&self, instant: Instant) -> Result<Instant> {
        self.append_with(instant, InstantDetails::Empty).await
    }

    /// Appends a new REQUESTED instant with `details`.
    ///
    /// # Errors
    ///
    /// - [`TimelineError::OutOfOrderInstant`] if the timestamp is not strictly
    ///   greater than the last one, or a marker already exists for it
    /// - [`TimelineError::CompactionAlreadyPending`] when appending a
    ///   compaction while another is outstanding
    /// - [`TimelineError::InvalidTransition`] if `instant` is not REQUESTED
    pub async fn append_with(&self, instant: Instant, details: InstantDetails) -> Result<Instant> {
        self.append_marker(instant, details, None).await
    }

    /// Appends a new REQUESTED instant with `details`, recording that it was
    /// requested at `now`.
    ///
    /// The recorded time stands in for the timestamp in the compaction time
    /// rule when the timestamp has no wall-clock meaning.
    ///
    /// # Errors
    ///
    /// See [`Self::append_with`].
    pub async fn append_at(
        &self,
        instant: Instant,
        details: InstantDetails,
        now: DateTime<Utc>,
    ) -> Result<Instant> {
        self.append_marker(instant, details, Some(now)).await
    }

    async fn append_marker(
        &self,
        instant: Instant,
        details: InstantDetails,
        requested_at: Option<DateTime<Utc>>,
    ) -> Result<Instant> {
        if instant.state() != State::Requested {
            return Err(TimelineError::invalid_transition(
                instant.timestamp(),
                instant.action(),
                "append as requested",
                instant.state().as_label(),
            ));
        }

        {
            let view = self.read_view()?;
            if let Some(last) = view.last_instant(&InstantFilter::all()) {
                if instant.timestamp() <= last.timestamp() {
                    return Err(TimelineError::OutOfOrderInstant {
                        timestamp: instant.timestamp().clone(),
                        last: last.timestamp().clone(),
                    });
                }
            }
            if instant.action() == Action::Compaction {
                if let Some(pending) = view.pending_compaction() {
                    return Err(TimelineError::CompactionAlreadyPending {
                        pending: pending.timestamp().clone(),
                        state: pending.state(),
                    });
                }
            }
        }

        let marker = InstantMarker::new(&instant, details).with_requested_at(requested_at);
        let path = TableStorage::instant_marker_path(instant.timestamp().as_str());
        let write = self
            .storage
            .put_raw(&path, encode_marker(&marker)?, WritePrecondition::DoesNotExist)
            .await?;

        match write {
            WriteResult::Success { .. } => {
                debug!(table = self.table(), %instant, "appended instant");
                self.write_view()?.upsert(instant.clone(), marker);
                Ok(instant)
            }
            WriteResult::PreconditionFailed { .. } => {
                // Another session already created this timestamp.
                Err(TimelineError::OutOfOrderInstant {
                    timestamp: instant.timestamp().clone(),
                    last: instant.timestamp().clone(),
                })
            }
        }
    }

    /// Moves `instant` to `to`, keeping its payload.
    ///
    /// # Errors
    ///
    /// See [`Self::transition_with`].
    pub async fn transition(&self, instant: &Instant, to: State) -> Result<Instant> {
        self.transition_with(instant, to, None).await
    }

    /// Moves `instant` to `to`, optionally replacing its payload.
    ///
    /// `instant` must describe the currently persisted action and state; `to`
    /// must be its direct successor. Completing a compaction records it under
    /// [`Action::Commit`] with its original timestamp.
    ///
    /// # Errors
    ///
    /// - [`TimelineError::InvalidTransition`] if the persisted state differs
    ///   from `instant` (stale view or concurrent session) or `to` is not the
    ///   next state
    /// - [`TimelineError::InstantNotFound`] if no marker exists
    pub async fn transition_with(
        &self,
        instant: &Instant,
        to: State,
        details: Option<InstantDetails>,
    ) -> Result<Instant> {
        let requested = format!("{} -> {to}", instant.state());
        if !instant.state().can_transition_to(to) {
            return Err(TimelineError::invalid_transition(
                instant.timestamp(),
                instant.action(),
                requested,
                format!("no transition from {}", instant.state()),
            ));
        }

        let path = TableStorage::instant_marker_path(instant.timestamp().as_str());
        let Some(meta) = self.storage.head_raw(&path).await? else {
            return Err(TimelineError::InstantNotFound {
                timestamp: instant.timestamp().clone(),
            });
        };
        let current = self.read_marker(&path).await?;

        if current.action != instant.action() || current.state != instant.state() {
            metrics::record_transition_conflict(self.table(), instant.action().as_label());
            return Err(TimelineError::invalid_transition(
                instant.timestamp(),
                instant.action(),
                requested,
                format!("{} {}", current.action, current.state),
            ));
        }

        let next = instant.transitioned(to);
        let marker = InstantMarker::new(&next, details.unwrap_or(current.details))
            .with_requested_at(current.requested_at);
        let write = self
            .storage
            .put_raw(
                &path,
                encode_marker(&marker)?,
                WritePrecondition::MatchesVersion(meta.version),
            )
            .await?;

        match write {
            WriteResult::Success { .. } => {
                debug!(table = self.table(), from = %instant, to = %next, "transitioned instant");
                self.write_view()?.upsert(next.clone(), marker);
                Ok(next)
            }
            WriteResult::PreconditionFailed { .. } => {
                metrics::record_transition_conflict(self.table(), instant.action().as_label());
                let actual = self.read_marker(&path).await?;
                warn!(
                    table = self.table(),
                    %instant,
                    actual = %actual.instant(),
                    "lost transition race; refresh required"
                );
                Err(TimelineError::invalid_transition(
                    instant.timestamp(),
                    instant.action(),
                    requested,
                    format!("{} {}", actual.action, actual.state),
                ))
            }
        }
    }

    async fn read_marker(&self, path: &str) -> Result<InstantMarker> {
        let bytes = self.storage.get_raw(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            TimelineError::serialization(format!("failed to decode instant marker {path}: {e}"))
        })
    }
}

fn encode_marker(marker: &InstantMarker) -> Result<Bytes> {
    serde_json::to_vec(marker).map(Bytes::from).map_err(|e| {
        TimelineError::serialization(format!("failed to encode instant marker: {e}"))
    })
}
