//! Writer collaborator consumed by the pipeline and the coordinator.

use async_trait::async_trait;

use crate::error::Result;
use crate::instant::InstantTime;
use crate::types::{CommitMetadata, CompactionPlan, WriteBatch};

/// Physical write path of a table.
///
/// Both operations must be safe to repeat for the same input: a crashed
/// session's instant is adopted and re-executed by the next session.
#[async_trait]
pub trait TableWriter: Send + Sync {
    /// Writes delta log blocks for `batch` under the delta commit `instant`.
    ///
    /// Returns the file groups that were touched.
    async fn ingest(&self, instant: &InstantTime, batch: &WriteBatch) -> Result<CommitMetadata>;

    /// Merges the delta logs of the plan's file groups into new base files.
    ///
    /// Atomic per file group.
    async fn merge(&self, instant: &InstantTime, plan: &CompactionPlan) -> Result<()>;
}
