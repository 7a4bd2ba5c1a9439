//! Executors the registry substitutes when dispatch fails.

use crate::jobs::{Job, JobExecutor, JobLogger, JobOutcome};

/// Stands in for a job type with no registered factory.
#[derive(Debug, Clone)]
pub struct UnknownTypeExecutor {
    job_type: String,
}

impl UnknownTypeExecutor {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
        }
    }
}

impl JobExecutor for UnknownTypeExecutor {
    fn execute(&self, _arguments: &str, _job: &Job, logger: &JobLogger) -> JobOutcome {
        logger.error(format!("Unknown job type: {}", self.job_type));
        JobOutcome::unknown()
    }
}

/// Stands in for an executor whose factory failed; reports the original error.
#[derive(Debug, Clone)]
pub struct CreationFailedExecutor {
    job_type: String,
    error: String,
}

impl CreationFailedExecutor {
    pub fn new(job_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            error: error.into(),
        }
    }

    pub fn error(&self) -> &str {
        &self.error
    }
}

impl JobExecutor for CreationFailedExecutor {
    fn execute(&self, _arguments: &str, _job: &Job, logger: &JobLogger) -> JobOutcome {
        logger.error(format!(
            "Failed to create executor for job type {}: {}",
            self.job_type, self.error
        ));
        JobOutcome::failed()
    }
}
