//! Observability infrastructure for Mantle.
//!
//! Structured logging with consistent spans. This module provides the
//! initialization helper and span constructors used by the timeline crates.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `mantle_timeline=debug`)
///
/// # Example
///
/// ```rust
/// use mantle_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let registry = tracing_subscriber::registry().with(env_filter);
        let _ = match format {
            LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        };
    });
}

/// Creates a span for timeline operations with standard fields.
///
/// # Example
///
/// ```rust
/// use mantle_core::observability::timeline_span;
///
/// let span = timeline_span("delta_commit", "trips", "20240101120000000");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn timeline_span(operation: &str, table: &str, instant: &str) -> Span {
    tracing::info_span!(
        "timeline",
        op = operation,
        table = table,
        instant = instant,
    )
}

/// Creates a span for a compaction coordinator cycle.
#[must_use]
pub fn compaction_span(table: &str, inline: bool) -> Span {
    tracing::info_span!("compaction", table = table, inline = inline)
}
