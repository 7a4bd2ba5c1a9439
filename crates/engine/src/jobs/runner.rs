//! Background job runner.
//!
//! A runner owns one thread. Each tick asks the scheduler for the next
//! eligible job, claims it with a compare-and-swap on its status, executes it
//! and persists the terminal status. Several runners may share one store;
//! the claim guarantees each job is executed at most once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use jobtree_core::JobId;

use super::executor::panic_message;
use super::logger::JobLogger;
use super::registry::ExecutorRegistry;
use super::scheduler::{JobScheduler, SchedulerError};
use super::store::JobStoreError;
use super::types::{Job, JobOutcome, JobStatus, StatusUpdate};

pub const ENV_RUNNER_NAME: &str = "JOBTREE_RUNNER_NAME";
pub const ENV_POLL_INTERVAL_MS: &str = "JOBTREE_POLL_INTERVAL_MS";

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunnerConfig {
    /// Thread name and `runner` log field
    pub name: String,
    /// How long to wait for a wake-up before polling again when idle
    pub poll_interval: Duration,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            name: "job-runner".to_string(),
            poll_interval: Duration::from_millis(2000),
        }
    }
}

/// Invalid runner configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

impl JobRunnerConfig {
    /// Read `JOBTREE_RUNNER_NAME` and `JOBTREE_POLL_INTERVAL_MS`.
    pub fn from_env() -> Result<Self, RunnerConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RunnerConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_RUNNER_NAME) {
            if name.trim().is_empty() {
                return Err(RunnerConfigError::InvalidValue {
                    key: ENV_RUNNER_NAME,
                    value: name,
                });
            }
            config.name = name;
        }

        if let Some(raw) = lookup(ENV_POLL_INTERVAL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.poll_interval = Duration::from_millis(ms),
                _ => {
                    return Err(RunnerConfigError::InvalidValue {
                        key: ENV_POLL_INTERVAL_MS,
                        value: raw,
                    });
                }
            }
        }

        Ok(config)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Runner error.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("job {0} left the running state while this runner owned it")]
    LostRunningJob(JobId),
    #[error("failed to spawn runner thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result of a single scheduling round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was eligible
    Idle,
    /// The job was claimed and executed; `status` is what was stored
    Executed { job_id: JobId, status: JobStatus },
    /// Another runner claimed the job first
    ClaimLost { job_id: JobId },
    /// The job still had an unfinished child and was not claimed
    NotReady { job_id: JobId },
}

/// Runner runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub jobs_processed: u64,
    pub jobs_finished: u64,
    pub jobs_failed: u64,
    pub claims_lost: u64,
    pub uptime_secs: u64,
}

impl RunnerStats {
    fn record(&mut self, outcome: &TickOutcome) {
        match outcome {
            TickOutcome::Idle | TickOutcome::NotReady { .. } => {}
            TickOutcome::Executed { status, .. } => {
                self.jobs_processed += 1;
                if *status == JobStatus::Finished {
                    self.jobs_finished += 1;
                } else {
                    self.jobs_failed += 1;
                }
            }
            TickOutcome::ClaimLost { .. } => self.claims_lost += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Wake,
    Shutdown,
}

/// Wakes a runner that is waiting for work.
#[derive(Debug, Clone)]
pub struct JobNotifier {
    tx: mpsc::Sender<Signal>,
}

impl JobNotifier {
    pub fn wake(&self) {
        // A stopped runner has nobody left to wake.
        let _ = self.tx.send(Signal::Wake);
    }
}

/// Receiving half of [`signal_channel`], consumed by [`JobRunner::with_signals`].
#[derive(Debug)]
pub struct SignalReceiver {
    tx: mpsc::Sender<Signal>,
    rx: mpsc::Receiver<Signal>,
}

/// Create a wake-up channel; hand the notifier to the scheduler and the
/// receiver to the runner.
pub fn signal_channel() -> (JobNotifier, SignalReceiver) {
    let (tx, rx) = mpsc::channel();
    (JobNotifier { tx: tx.clone() }, SignalReceiver { tx, rx })
}

/// Handle to control a running runner.
#[derive(Debug)]
pub struct JobRunnerHandle {
    signals: mpsc::Sender<Signal>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<RunnerStats>>,
}

impl JobRunnerHandle {
    pub fn notifier(&self) -> JobNotifier {
        JobNotifier {
            tx: self.signals.clone(),
        }
    }

    /// Current runner statistics.
    pub fn stats(&self) -> RunnerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stop after the current job and wait for the thread to exit.
    pub fn shutdown(mut self) -> RunnerStats {
        let _ = self.signals.send(Signal::Shutdown);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("job runner thread panicked");
            }
        }
        self.stats()
    }
}

/// Executes eligible jobs one at a time.
pub struct JobRunner {
    scheduler: Arc<JobScheduler>,
    registry: Arc<ExecutorRegistry>,
    config: JobRunnerConfig,
    signals: Option<SignalReceiver>,
}

impl JobRunner {
    pub fn new(
        scheduler: Arc<JobScheduler>,
        registry: Arc<ExecutorRegistry>,
        config: JobRunnerConfig,
    ) -> Self {
        Self {
            scheduler,
            registry,
            config,
            signals: None,
        }
    }

    /// Listen on a channel created with [`signal_channel`].
    pub fn with_signals(mut self, signals: SignalReceiver) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn config(&self) -> &JobRunnerConfig {
        &self.config
    }

    /// Run at most one eligible job.
    pub fn tick(&self) -> Result<TickOutcome, RunnerError> {
        match self.scheduler.find_eligible()? {
            Some(job) => self.run_job(job),
            None => Ok(TickOutcome::Idle),
        }
    }

    /// Claim and execute `job`.
    ///
    /// Children are re-read first; a job with an unfinished child is left
    /// unclaimed. Statuses never move back, so a child seen `Finished` here
    /// stays finished through the claim.
    pub(crate) fn run_job(&self, job: Job) -> Result<TickOutcome, RunnerError> {
        let store = self.scheduler.store();
        let children = store.children_of(job.id)?;
        if let Some(child) = children.iter().find(|c| c.status != JobStatus::Finished) {
            debug!(
                runner = %self.config.name,
                job_id = %job.id,
                child_id = %child.id,
                "job has an unfinished child"
            );
            return Ok(TickOutcome::NotReady { job_id: job.id });
        }

        let claimed = store.compare_and_set_status(
            job.id,
            JobStatus::Pending,
            StatusUpdate::to(JobStatus::Running),
        )?;
        if !claimed {
            debug!(runner = %self.config.name, job_id = %job.id, "job claimed elsewhere");
            return Ok(TickOutcome::ClaimLost { job_id: job.id });
        }

        debug!(
            runner = %self.config.name,
            job_id = %job.id,
            job_type = ?job.job_type,
            "claimed job"
        );

        let logger = JobLogger::new(&job);
        let outcome = match job.job_type.as_deref() {
            Some(job_type) => self.execute(job_type, &job, &logger),
            None => {
                logger.info("all children finished");
                JobOutcome::finished()
            }
        };

        let status = if outcome.status.is_terminal() {
            outcome.status.persisted()
        } else {
            logger.error(format!(
                "executor returned non-terminal status {}",
                outcome.status
            ));
            JobStatus::Failed
        };

        let mut update = StatusUpdate::to(status);
        if status == JobStatus::Finished {
            if let Some(storage_id) = outcome.storage_id {
                update = update.with_storage_id(storage_id);
            }
        }
        if let Some(log) = logger.into_text() {
            update = update.with_log(log);
        }

        if !store.compare_and_set_status(job.id, JobStatus::Running, update)? {
            return Err(RunnerError::LostRunningJob(job.id));
        }

        if status == JobStatus::Failed {
            warn!(
                runner = %self.config.name,
                job_id = %job.id,
                job_type = ?job.job_type,
                "job failed"
            );
            self.scheduler.propagate_failure(job.id)?;
        } else {
            info!(
                runner = %self.config.name,
                job_id = %job.id,
                job_type = ?job.job_type,
                "job finished"
            );
        }

        Ok(TickOutcome::Executed {
            job_id: job.id,
            status,
        })
    }

    fn execute(&self, job_type: &str, job: &Job, logger: &JobLogger) -> JobOutcome {
        let context = self.scheduler.executor_context();
        let executor = self.registry.create(job_type, &context);

        match panic::catch_unwind(AssertUnwindSafe(|| {
            executor.execute(&job.arguments, job, logger)
        })) {
            Ok(outcome) => outcome,
            Err(payload) => {
                logger.error(format!(
                    "executor panicked: {}",
                    panic_message(payload.as_ref())
                ));
                JobOutcome::failed()
            }
        }
    }

    /// Run on a dedicated thread until shut down.
    pub fn spawn(mut self) -> Result<JobRunnerHandle, RunnerError> {
        let SignalReceiver { tx, rx } = self.signals.take().unwrap_or_else(|| {
            let (_, receiver) = signal_channel();
            receiver
        });
        let stats = Arc::new(Mutex::new(RunnerStats::default()));
        let thread_stats = stats.clone();

        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || run_loop(self, rx, thread_stats))?;

        Ok(JobRunnerHandle {
            signals: tx,
            join: Some(join),
            stats,
        })
    }
}

fn run_loop(runner: JobRunner, rx: mpsc::Receiver<Signal>, stats: Arc<Mutex<RunnerStats>>) {
    let name = runner.config.name.clone();
    info!(runner = %name, "job runner started");
    let started = Instant::now();

    'run: loop {
        loop {
            match rx.try_recv() {
                Ok(Signal::Wake) => continue,
                Ok(Signal::Shutdown) | Err(mpsc::TryRecvError::Disconnected) => break 'run,
                Err(mpsc::TryRecvError::Empty) => break,
            }
        }

        let idle = match runner.tick() {
            Ok(TickOutcome::Idle | TickOutcome::NotReady { .. }) => true,
            Ok(outcome) => {
                stats
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(&outcome);
                false
            }
            Err(e) => {
                error!(runner = %name, error = %e, "job runner tick failed");
                true
            }
        };

        stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .uptime_secs = started.elapsed().as_secs();

        if idle {
            match rx.recv_timeout(runner.config.poll_interval) {
                Ok(Signal::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Ok(Signal::Wake) | Err(mpsc::RecvTimeoutError::Timeout) => {}
            }
        }
    }

    info!(runner = %name, "job runner stopped");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use jobtree_core::OwnerId;

    use super::*;
    use crate::jobs::{
        ExecutorContext, InMemoryBlobStore, InMemoryJobStore, JobDescription, JobExecutor,
        OwnerFilter,
    };

    fn runner_with(registry: ExecutorRegistry) -> JobRunner {
        let scheduler = JobScheduler::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        );
        JobRunner::new(
            Arc::new(scheduler),
            Arc::new(registry),
            JobRunnerConfig::default().with_name("test-runner"),
        )
    }

    fn register_fn(
        registry: &mut ExecutorRegistry,
        job_type: &str,
        f: fn(&str, &Job, &JobLogger) -> JobOutcome,
    ) {
        registry
            .register(job_type, move |_: &ExecutorContext| {
                let executor: Box<dyn JobExecutor> = Box::new(f);
                Ok(executor)
            })
            .unwrap();
    }

    fn stored(runner: &JobRunner, id: JobId) -> Job {
        runner.scheduler.store().get(id).unwrap().unwrap()
    }

    #[test]
    fn config_defaults_and_overrides() {
        let config = JobRunnerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, JobRunnerConfig::default());

        let env = HashMap::from([
            (ENV_RUNNER_NAME, "archiver"),
            (ENV_POLL_INTERVAL_MS, "250"),
        ]);
        let config =
            JobRunnerConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.name, "archiver");
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn invalid_poll_interval_is_rejected() {
        for raw in ["0", "soon", "-5"] {
            let err = JobRunnerConfig::from_lookup(|k| {
                (k == ENV_POLL_INTERVAL_MS).then(|| raw.to_string())
            })
            .unwrap_err();
            assert_eq!(
                err,
                RunnerConfigError::InvalidValue {
                    key: ENV_POLL_INTERVAL_MS,
                    value: raw.to_string()
                }
            );
        }
    }

    #[test]
    fn idle_when_nothing_is_pending() {
        let runner = runner_with(ExecutorRegistry::new());
        assert_eq!(runner.tick().unwrap(), TickOutcome::Idle);
    }

    #[test]
    fn container_finishes_after_children() {
        let mut registry = ExecutorRegistry::new();
        register_fn(&mut registry, "noop", |_, _, _| JobOutcome::finished());
        let runner = runner_with(registry);
        let owner = OwnerId::new();
        let root = runner
            .scheduler
            .submit(JobDescription::container(owner).with_child(JobDescription::new(owner, "noop")))
            .unwrap();

        assert!(matches!(
            runner.tick().unwrap(),
            TickOutcome::Executed {
                status: JobStatus::Finished,
                ..
            }
        ));
        assert_eq!(
            runner.tick().unwrap(),
            TickOutcome::Executed {
                job_id: root,
                status: JobStatus::Finished
            }
        );
        assert_eq!(runner.tick().unwrap(), TickOutcome::Idle);
        assert!(stored(&runner, root).storage_id.is_none());
    }

    #[test]
    fn non_terminal_outcome_is_stored_as_failed() {
        let mut registry = ExecutorRegistry::new();
        register_fn(&mut registry, "confused", |_, _, _| JobOutcome {
            status: JobStatus::Running,
            storage_id: None,
        });
        let runner = runner_with(registry);
        let id = runner
            .scheduler
            .submit(JobDescription::new(OwnerId::new(), "confused"))
            .unwrap();

        runner.tick().unwrap();

        let job = stored(&runner, id);
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.log.unwrap().contains("non-terminal status running"));
    }

    #[test]
    fn storage_id_of_failed_job_is_dropped() {
        let mut registry = ExecutorRegistry::new();
        register_fn(&mut registry, "half", |_, _, _| JobOutcome {
            status: JobStatus::Failed,
            storage_id: Some("elsewhere/main".to_string()),
        });
        let runner = runner_with(registry);
        let id = runner
            .scheduler
            .submit(JobDescription::new(OwnerId::new(), "half"))
            .unwrap();

        runner.tick().unwrap();

        assert!(stored(&runner, id).storage_id.is_none());
    }

    #[test]
    fn executor_panic_fails_job_and_parent() {
        let mut registry = ExecutorRegistry::new();
        register_fn(&mut registry, "explode", |_, _, _| panic!("kaboom"));
        let runner = runner_with(registry);
        let owner = OwnerId::new();
        let root = runner
            .scheduler
            .submit(
                JobDescription::container(owner).with_child(JobDescription::new(owner, "explode")),
            )
            .unwrap();
        let child = runner.scheduler.children_of(root).unwrap()[0].id;

        assert_eq!(
            runner.tick().unwrap(),
            TickOutcome::Executed {
                job_id: child,
                status: JobStatus::Failed
            }
        );
        assert!(stored(&runner, child).log.unwrap().contains("executor panicked: kaboom"));
        assert_eq!(stored(&runner, root).status, JobStatus::Failed);
        assert_eq!(runner.tick().unwrap(), TickOutcome::Idle);
    }

    #[test]
    fn stale_job_is_not_executed_twice() {
        let mut registry = ExecutorRegistry::new();
        register_fn(&mut registry, "noop", |_, _, _| JobOutcome::finished());
        let runner = runner_with(registry);
        runner
            .scheduler
            .submit(JobDescription::new(OwnerId::new(), "noop"))
            .unwrap();

        let job = runner.scheduler.find_eligible().unwrap().unwrap();
        let id = job.id;
        runner.run_job(job.clone()).unwrap();

        assert_eq!(runner.run_job(job).unwrap(), TickOutcome::ClaimLost { job_id: id });
    }

    #[test]
    fn parent_with_pending_child_is_not_claimed() {
        let mut registry = ExecutorRegistry::new();
        register_fn(&mut registry, "noop", |_, _, _| JobOutcome::finished());
        let runner = runner_with(registry);
        let owner = OwnerId::new();
        let root = runner
            .scheduler
            .submit(
                JobDescription::container(owner).with_child(JobDescription::new(owner, "noop")),
            )
            .unwrap();
        let child = runner.scheduler.children_of(root).unwrap()[0].id;

        let snapshot = runner
            .scheduler
            .find_by_id(root, OwnerFilter::Any)
            .unwrap()
            .unwrap();
        assert_eq!(
            runner.run_job(snapshot).unwrap(),
            TickOutcome::NotReady { job_id: root }
        );
        assert_eq!(stored(&runner, root).status, JobStatus::Pending);
        assert_eq!(stored(&runner, child).status, JobStatus::Pending);

        while runner.tick().unwrap() != TickOutcome::Idle {}
        assert_eq!(stored(&runner, child).status, JobStatus::Finished);
        assert_eq!(stored(&runner, root).status, JobStatus::Finished);
    }

    #[test]
    fn job_moved_out_of_running_is_reported() {
        let mut registry = ExecutorRegistry::new();
        registry
            .register("usurped", |context: &ExecutorContext| {
                let jobs = context.jobs.clone();
                let executor: Box<dyn JobExecutor> =
                    Box::new(move |_: &str, job: &Job, _: &JobLogger| {
                        jobs.compare_and_set_status(
                            job.id,
                            JobStatus::Running,
                            StatusUpdate::to(JobStatus::Failed),
                        )
                        .unwrap();
                        JobOutcome::finished()
                    });
                Ok(executor)
            })
            .unwrap();
        let runner = runner_with(registry);
        let id = runner
            .scheduler
            .submit(JobDescription::new(OwnerId::new(), "usurped"))
            .unwrap();

        let err = runner.tick().unwrap_err();

        assert!(matches!(err, RunnerError::LostRunningJob(job_id) if job_id == id));
        assert_eq!(stored(&runner, id).status, JobStatus::Failed);
    }

    #[test]
    fn stats_count_outcomes() {
        let mut stats = RunnerStats::default();
        let job_id = JobId::new();
        stats.record(&TickOutcome::Executed { job_id, status: JobStatus::Finished });
        stats.record(&TickOutcome::Executed { job_id, status: JobStatus::Failed });
        stats.record(&TickOutcome::ClaimLost { job_id });
        stats.record(&TickOutcome::Idle);

        assert_eq!(stats.jobs_processed, 2);
        assert_eq!(stats.jobs_finished, 1);
        assert_eq!(stats.jobs_failed, 1);
        assert_eq!(stats.claims_lost, 1);
    }

    #[test]
    fn spawned_runner_stops_on_shutdown() {
        let runner = runner_with(ExecutorRegistry::new());
        let handle = runner.spawn().unwrap();
        handle.notifier().wake();

        let stats = handle.shutdown();
        assert_eq!(stats.jobs_processed, 0);
    }
}
