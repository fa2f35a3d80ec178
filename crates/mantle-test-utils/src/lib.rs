//! Test harness for Mantle timelines.
//!
//! A [`TestTable`] bundles one [`TracingMemoryBackend`], a [`RecordingWriter`]
//! and a [`SimulatedClock`]; every session opened from it shares that storage,
//! so a test can crash one session and resume the table from another.
//!
//! ```rust,ignore
//! use mantle_test_utils::{TestTable, batch};
//! use mantle_timeline::CompactionConfig;
//!
//! let table = TestTable::new();
//! let session = table.session(CompactionConfig::default()).await;
//! session.start_delta_commit(&batch(3, "2024/01/01"), table.clock.now()).await?;
//! ```

#![deny(missing_docs)]
// Helpers panic on misuse.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::missing_panics_doc)]

mod assertions;
mod fixtures;
mod simulation;
mod storage;

pub use assertions::{
    assert_all_puts_conditional, assert_last_instant, assert_single_pending_compaction,
    assert_strictly_increasing,
};
pub use fixtures::{RecordingWriter, TestTable, batch, batch_across, record, ts};
pub use simulation::SimulatedClock;
pub use storage::{StorageOp, TracingMemoryBackend};

/// Routes `mantle_*` tracing output to the test harness, once per process.
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mantle_core=debug,mantle_timeline=debug"));
    let _ = fmt().with_env_filter(filter).with_test_writer().try_init();
}
