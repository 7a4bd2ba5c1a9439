//! Executor contract for job types.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::blob::BlobStore;
use super::logger::JobLogger;
use super::store::JobStore;
use super::types::{Job, JobOutcome};

/// Trait for implementing job executors.
///
/// One executor instance is built per attempt (see
/// [`ExecutorRegistry::create`](super::registry::ExecutorRegistry::create)).
/// Implementations report failures through the returned [`JobOutcome`] and
/// the logger; they return `Finished`, `Failed` or `Unknown`, never
/// `Pending`/`Running`. A panic is recorded by the runner as `Failed`.
pub trait JobExecutor: Send + Sync {
    fn execute(&self, arguments: &str, job: &Job, logger: &JobLogger) -> JobOutcome;
}

impl<F> JobExecutor for F
where
    F: Fn(&str, &Job, &JobLogger) -> JobOutcome + Send + Sync,
{
    fn execute(&self, arguments: &str, job: &Job, logger: &JobLogger) -> JobOutcome {
        self(arguments, job, logger)
    }
}

/// Services available to executor factories.
#[derive(Clone)]
pub struct ExecutorContext {
    pub jobs: Arc<dyn JobStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl ExecutorContext {
    pub fn new(jobs: Arc<dyn JobStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { jobs, blobs }
    }
}

impl fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("jobs", &"<dyn JobStore>")
            .field("blobs", &"<dyn BlobStore>")
            .finish()
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_readable() {
        let literal: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(literal.as_ref()), "static message");

        let formatted: Box<dyn Any + Send> = Box::new(format!("code {}", 7));
        assert_eq!(panic_message(formatted.as_ref()), "code 7");

        let other: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
