//! # mantle-core
//!
//! Core abstractions shared by the Mantle table storage layer.
//!
//! This crate provides the foundational types and traits used by the timeline
//! and compaction components:
//!
//! - **Storage Traits**: object storage with conditional (CAS) writes
//! - **Table Storage**: table-scoped path layout with traversal protection
//! - **Error Types**: shared error definitions and result types
//! - **Observability**: logging initialization and span helpers
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use mantle_core::prelude::*;
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let storage = TableStorage::new(backend, "trips").expect("valid table name");
//! assert_eq!(storage.table(), "trips");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod error;
pub mod observability;
pub mod storage;
pub mod table_storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use mantle_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
    pub use crate::table_storage::{TablePath, TableStorage};
}

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use observability::{LogFormat, init_logging, timeline_span};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
pub use table_storage::{TablePath, TableStorage};
