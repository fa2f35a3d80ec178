//! Table-scoped storage with the timeline path layout.
//!
//! All paths are prefixed with `tables/{table}/`. Timeline markers live under
//! `tables/{table}/.timeline/{timestamp}.json`.
//!
//! # Security
//!
//! - Table names are validated at construction
//! - Path traversal attempts (`..`) are rejected
//! - Absolute paths, backslashes and control characters are rejected

use bytes::Bytes;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Directory (relative to the table root) holding timeline markers.
pub const TIMELINE_DIR: &str = ".timeline";

/// Table-scoped storage wrapper.
#[derive(Clone)]
pub struct TableStorage {
    backend: Arc<dyn StorageBackend>,
    table: String,
}

impl std::fmt::Debug for TableStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStorage")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl TableStorage {
    /// Creates a new table-scoped storage wrapper.
    ///
    /// # Errors
    ///
    /// Returns an error if `table` is invalid. Table names must be non-empty,
    /// ASCII lowercase alphanumeric (plus `-` and `_`).
    pub fn new(backend: Arc<dyn StorageBackend>, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        Self::validate_table(&table)?;
        Ok(Self { backend, table })
    }

    fn validate_table(table: &str) -> Result<()> {
        if table.is_empty() {
            return Err(Error::InvalidId {
                message: "table name cannot be empty".to_string(),
            });
        }

        if !table
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(Error::InvalidId {
                message: format!(
                    "table name '{table}' contains invalid characters (allowed: a-z, 0-9, '-', '_')"
                ),
            });
        }

        Ok(())
    }

    fn validate_path(path: &str) -> Result<()> {
        if path.starts_with('/') || path.starts_with('\\') {
            return Err(Error::InvalidInput(format!(
                "absolute paths not allowed: {path}"
            )));
        }

        if path.contains('\\') {
            return Err(Error::InvalidInput(format!(
                "backslashes not allowed in paths: {path}"
            )));
        }

        if path.contains('%') {
            return Err(Error::InvalidInput(format!(
                "percent-encoding not allowed in paths: {path}"
            )));
        }

        if path.chars().any(char::is_control) {
            return Err(Error::InvalidInput(format!(
                "control characters not allowed in paths: {path:?}"
            )));
        }

        for segment in path.split('/') {
            if segment == "." || segment == ".." {
                return Err(Error::InvalidInput(format!(
                    "path traversal not allowed: {path}"
                )));
            }
        }

        Ok(())
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the backend for advanced operations.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn table_prefix(&self) -> String {
        format!("tables/{}/", self.table)
    }

    fn scoped_path(&self, path: &str) -> String {
        format!("{}{}", self.table_prefix(), path)
    }

    /// Table-relative directory prefix of the timeline (with trailing slash).
    #[must_use]
    pub fn timeline_prefix() -> String {
        format!("{TIMELINE_DIR}/")
    }

    /// Table-relative path of the marker for `timestamp`.
    #[must_use]
    pub fn instant_marker_path(timestamp: &str) -> String {
        format!("{TIMELINE_DIR}/{timestamp}.json")
    }

    /// Reads data at a table-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path contains traversal sequences or the object is not found.
    pub async fn get_raw(&self, path: &str) -> Result<Bytes> {
        Self::validate_path(path)?;
        self.backend.get(&self.scoped_path(path)).await
    }

    /// Writes data at a table-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path contains traversal sequences.
    pub async fn put_raw(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        Self::validate_path(path)?;
        self.backend
            .put(&self.scoped_path(path), data, precondition)
            .await
    }

    /// Gets metadata at a table-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path contains traversal sequences.
    pub async fn head_raw(&self, path: &str) -> Result<Option<ObjectMeta>> {
        Self::validate_path(path)?;
        self.backend.head(&self.scoped_path(path)).await
    }

    /// Lists objects at a table-relative prefix.
    ///
    /// Returns table-relative paths together with their version tokens.
    /// Order is whatever the backend returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix contains traversal sequences.
    pub async fn list(&self, prefix: &str) -> Result<Vec<(TablePath, String)>> {
        Self::validate_path(prefix)?;
        let full_prefix = self.scoped_path(prefix);
        let table_prefix = self.table_prefix();

        let metas = self.backend.list(&full_prefix).await?;

        Ok(metas
            .into_iter()
            .filter_map(|m| {
                m.path
                    .strip_prefix(&table_prefix)
                    .map(|p| (TablePath(p.to_string()), m.version))
            })
            .collect())
    }
}

/// A path relative to a table root, as returned by [`TableStorage::list`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TablePath(String);

impl TablePath {
    /// Returns the path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the final path segment.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }
}

impl std::fmt::Display for TablePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
