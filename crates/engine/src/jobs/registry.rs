//! String-keyed registry of executor factories.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use super::executor::{ExecutorContext, JobExecutor, panic_message};
use crate::executors::{
    ArchiveExecutor, CreationFailedExecutor, SampleExecutor, UnknownTypeExecutor, job_types,
};

/// Builds a fresh executor for one execution attempt.
pub type ExecutorFactory =
    Box<dyn Fn(&ExecutorContext) -> anyhow::Result<Box<dyn JobExecutor>> + Send + Sync>;

/// Registry configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("job type already registered: {0}")]
    DuplicateJobType(String),
    #[error("job type must not be empty")]
    EmptyJobType,
}

/// Maps job types to executor factories.
///
/// Lookups never fail: an unregistered type resolves to
/// [`UnknownTypeExecutor`] and a factory that errors or panics resolves to
/// [`CreationFailedExecutor`], so every claimed job reaches a terminal status.
#[derive(Default)]
pub struct ExecutorRegistry {
    factories: HashMap<String, ExecutorFactory>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `job_type`.
    pub fn register<F>(
        &mut self,
        job_type: impl Into<String>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&ExecutorContext) -> anyhow::Result<Box<dyn JobExecutor>> + Send + Sync + 'static,
    {
        let job_type = job_type.into();
        if job_type.is_empty() {
            return Err(RegistryError::EmptyJobType);
        }
        if self.factories.contains_key(&job_type) {
            return Err(RegistryError::DuplicateJobType(job_type));
        }
        debug!(job_type = %job_type, "registered executor");
        self.factories.insert(job_type, Box::new(factory));
        Ok(())
    }

    /// Register the executors shipped with the engine.
    pub fn register_builtin(&mut self) -> Result<(), RegistryError> {
        self.register(job_types::SAMPLE, SampleExecutor::factory)?;
        self.register(job_types::ARCHIVE, ArchiveExecutor::factory)?;
        Ok(())
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Resolve an executor for `job_type`.
    pub fn create(&self, job_type: &str, context: &ExecutorContext) -> Box<dyn JobExecutor> {
        let Some(factory) = self.factories.get(job_type) else {
            warn!(job_type = %job_type, "no executor registered");
            return Box::new(UnknownTypeExecutor::new(job_type));
        };

        match panic::catch_unwind(AssertUnwindSafe(|| factory(context))) {
            Ok(Ok(executor)) => executor,
            Ok(Err(e)) => {
                warn!(job_type = %job_type, error = %e, "executor factory failed");
                Box::new(CreationFailedExecutor::new(job_type, format!("{e:#}")))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(job_type = %job_type, error = %message, "executor factory panicked");
                Box::new(CreationFailedExecutor::new(
                    job_type,
                    format!("factory panicked: {message}"),
                ))
            }
        }
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use jobtree_core::OwnerId;

    use super::*;
    use crate::jobs::{
        InMemoryBlobStore, InMemoryJobStore, Job, JobDescription, JobLogger, JobOutcome, JobStatus,
    };

    fn context() -> ExecutorContext {
        ExecutorContext::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(InMemoryBlobStore::new()),
        )
    }

    fn run(registry: &ExecutorRegistry, job_type: &str) -> (JobOutcome, Vec<String>) {
        let job = Job::pending(&JobDescription::new(OwnerId::new(), job_type), None, Utc::now());
        let logger = JobLogger::new(&job);
        let executor = registry.create(job_type, &context());
        let outcome = executor.execute("", &job, &logger);
        (outcome, logger.lines())
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ExecutorRegistry::new();
        registry.register_builtin().unwrap();

        assert_eq!(
            registry.register(job_types::SAMPLE, SampleExecutor::factory),
            Err(RegistryError::DuplicateJobType("sample".to_string()))
        );
        assert_eq!(
            registry.register("", SampleExecutor::factory),
            Err(RegistryError::EmptyJobType)
        );
        assert_eq!(registry.job_types(), vec!["archive", "sample"]);
    }

    #[test]
    fn registered_factory_is_used() {
        let mut registry = ExecutorRegistry::new();
        registry
            .register("noop", |_: &ExecutorContext| {
                let executor: Box<dyn JobExecutor> =
                    Box::new(|_: &str, _: &Job, _: &JobLogger| JobOutcome::finished());
                Ok(executor)
            })
            .unwrap();

        assert!(registry.contains("noop"));
        let (outcome, _) = run(&registry, "noop");
        assert_eq!(outcome.status, JobStatus::Finished);
    }

    #[test]
    fn unknown_type_resolves_to_fallback() {
        let registry = ExecutorRegistry::new();
        let (outcome, lines) = run(&registry, "missing");

        assert_eq!(outcome.status, JobStatus::Unknown);
        assert!(lines[0].contains("Unknown job type"));
    }

    #[test]
    fn factory_error_is_captured() {
        let mut registry = ExecutorRegistry::new();
        registry
            .register("broken", |_: &ExecutorContext| -> anyhow::Result<Box<dyn JobExecutor>> {
                anyhow::bail!("template directory missing")
            })
            .unwrap();

        let (outcome, lines) = run(&registry, "broken");

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(lines[0].contains("template directory missing"));
    }

    #[test]
    fn factory_panic_is_captured() {
        let mut registry = ExecutorRegistry::new();
        registry
            .register("explosive", |_: &ExecutorContext| -> anyhow::Result<Box<dyn JobExecutor>> {
                panic!("constructor blew up")
            })
            .unwrap();

        let (outcome, lines) = run(&registry, "explosive");

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(lines[0].contains("constructor blew up"));
    }
}
