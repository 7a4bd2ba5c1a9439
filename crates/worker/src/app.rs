//! Worker assembly.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use jobtree_engine::jobs::{
    BlobStore, ExecutorRegistry, InMemoryBlobStore, InMemoryJobStore, JobRunner, JobRunnerHandle,
    JobScheduler, LocalBlobStore, RunnerStats, signal_channel,
};

use crate::config::WorkerConfig;

/// A started worker: the scheduler to submit through and the running runner.
///
/// The job store is in-memory and private to the process, so jobs can only be
/// submitted by code running in the same process through [`Worker::scheduler`].
/// The `jobtree-worker` binary is a host skeleton: it starts an empty queue and
/// runs until Ctrl-C. Embedders call [`Worker::start`] and submit work through
/// the returned scheduler.
pub struct Worker {
    scheduler: Arc<JobScheduler>,
    runner: JobRunnerHandle,
}

impl Worker {
    /// Build the stores, register the built-in executors and spawn the runner.
    pub fn start(config: &WorkerConfig) -> anyhow::Result<Self> {
        let blobs: Arc<dyn BlobStore> = match &config.blob_dir {
            Some(dir) => {
                let store = LocalBlobStore::open(dir)
                    .with_context(|| format!("opening blob directory {}", dir.display()))?;
                info!(blob_dir = %dir.display(), "using local blob store");
                Arc::new(store)
            }
            None => {
                info!("using in-memory blob store");
                Arc::new(InMemoryBlobStore::new())
            }
        };

        let mut registry = ExecutorRegistry::new();
        registry
            .register_builtin()
            .context("registering built-in executors")?;
        info!(job_types = ?registry.job_types(), "executors registered");

        let (notifier, signals) = signal_channel();
        let scheduler = Arc::new(
            JobScheduler::new(Arc::new(InMemoryJobStore::new()), blobs).with_notifier(notifier),
        );

        let runner = JobRunner::new(scheduler.clone(), Arc::new(registry), config.runner.clone())
            .with_signals(signals)
            .spawn()
            .context("starting job runner")?;

        Ok(Self { scheduler, runner })
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn stats(&self) -> RunnerStats {
        self.runner.stats()
    }

    /// Stop the runner after its current job.
    pub fn shutdown(self) -> RunnerStats {
        self.runner.shutdown()
    }
}
