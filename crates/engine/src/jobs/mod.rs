//! Hierarchical background jobs.
//!
//! ## Components
//!
//! - `JobStore`: persisted job rows; the only synchronization point between runners
//! - `BlobStore`: job artifacts addressed by `"{jobId}/{slot}"`
//! - `ExecutorRegistry`: job type → executor factory
//! - `JobScheduler`: submission, eligibility (deepest first) and failure propagation
//! - `JobRunner`: claims eligible jobs and executes them on a background thread
//!
//! Statuses only move forward. A job runs once all of its children are
//! `Finished`; a failed child fails its pending ancestors without running them.

pub mod blob;
pub mod executor;
pub mod logger;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod types;

pub use blob::{
    Blob, BlobDescriptor, BlobStore, BlobStoreError, InMemoryBlobStore, LocalBlobStore, MAIN_SLOT,
    blob_key,
};
pub use executor::{ExecutorContext, JobExecutor};
pub use logger::JobLogger;
pub use registry::{ExecutorFactory, ExecutorRegistry, RegistryError};
pub use runner::{
    JobNotifier, JobRunner, JobRunnerConfig, JobRunnerHandle, RunnerConfigError, RunnerError,
    RunnerStats, SignalReceiver, TickOutcome, signal_channel,
};
pub use scheduler::{JobScheduler, SchedulerError, SubmitError};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use types::{
    Job, JobDescription, JobOutcome, JobStatus, OwnerFilter, Page, Pagination, StatusUpdate,
};
