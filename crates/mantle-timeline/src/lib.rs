//! # mantle-timeline
//!
//! Commit timeline and compaction scheduling for Mantle merge-on-read tables.
//!
//! Writes land as delta commits. A compaction merges the accumulated delta
//! logs into new base files. This crate keeps the ordered record of both
//! (the timeline) and decides when compactions happen:
//!
//! - [`TimelineStore`]: append-only, object-store backed timeline with
//!   create-if-absent appends and compare-and-swap transitions
//! - [`policy::decide`]: count rule OR time rule
//! - [`CompactionCoordinator`]: adopts outstanding compactions, schedules new
//!   ones and executes them inline when configured
//! - [`WritePipeline`]: delta commits followed by inline compaction
//!
//! Physical file IO is delegated to a [`TableWriter`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use mantle_core::{MemoryBackend, TableStorage};
//! use mantle_timeline::{CompactionConfig, TableWriter, WriteBatch, WritePipeline};
//!
//! # async fn example(writer: Arc<dyn TableWriter>) -> mantle_timeline::Result<()> {
//! let storage = TableStorage::new(Arc::new(MemoryBackend::new()), "trips")?;
//! let config = CompactionConfig::default()
//!     .with_inline_compaction(true)
//!     .with_max_delta_commits(3);
//! let pipeline = WritePipeline::open(storage, writer, config).await?;
//!
//! let result = pipeline
//!     .start_delta_commit(&WriteBatch::default(), Utc::now())
//!     .await?;
//! println!("{} -> {}", result.instant, result.compaction.as_label());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod instant;
pub mod metrics;
pub mod pipeline;
pub mod policy;
pub mod timeline;
pub mod types;
pub mod writer;

pub use config::CompactionConfig;
pub use coordinator::{CompactionCoordinator, CompactionOutcome};
pub use error::{Result, TimelineError};
pub use instant::{Action, Instant, InstantFilter, InstantTime, State};
pub use pipeline::{DeltaCommitResult, WritePipeline};
pub use policy::{CompactionDecision, TriggerReason, decide};
pub use timeline::{FilteredInstants, Timeline, TimelineStore};
pub use types::{
    CommitMetadata, CompactionPlan, FileGroupId, InstantDetails, InstantMarker, Record, WriteBatch,
};
pub use writer::TableWriter;
