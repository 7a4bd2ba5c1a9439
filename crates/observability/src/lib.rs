//! Tracing and logging setup shared by the jobtree binaries.

/// Initialize process-wide tracing with the format named by `JOBTREE_LOG_FORMAT`.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, formatters).
pub mod tracing;
