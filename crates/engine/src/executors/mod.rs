//! Built-in executors.
//!
//! - `sample` - writes its arguments as the job's output (pipeline smoke test)
//! - `archive` - zips the outputs of its children under their suggested names
//! - fallbacks used by the registry when a job type cannot be dispatched

pub mod archive;
pub mod fallback;
pub mod sample;

pub use archive::{ArchiveExecutor, is_safe_entry_name};
pub use fallback::{CreationFailedExecutor, UnknownTypeExecutor};
pub use sample::SampleExecutor;

/// Job type constants for the built-in executors.
pub mod job_types {
    pub const SAMPLE: &str = "sample";
    pub const ARCHIVE: &str = "archive";
}
