//! Sample worker: writes its argument string as the job's output.

use std::sync::Arc;

use crate::jobs::{BlobStore, ExecutorContext, Job, JobExecutor, JobLogger, JobOutcome};

/// Executor for `sample` jobs.
pub struct SampleExecutor {
    blobs: Arc<dyn BlobStore>,
}

impl SampleExecutor {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Registry factory.
    pub fn factory(context: &ExecutorContext) -> anyhow::Result<Box<dyn JobExecutor>> {
        Ok(Box::new(Self::new(context.blobs.clone())))
    }
}

impl JobExecutor for SampleExecutor {
    fn execute(&self, arguments: &str, job: &Job, logger: &JobLogger) -> JobOutcome {
        let key = job.main_blob_key();
        let mut content = arguments.as_bytes();

        match self.blobs.write(&key, &mut content) {
            Ok(artifact) => {
                logger.info(format!("wrote {} bytes to {}", artifact.len, artifact.key));
                JobOutcome::finished_with(&artifact)
            }
            Err(e) => {
                logger.error(format!("failed to write output: {e}"));
                JobOutcome::failed()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{BlobStore, InMemoryBlobStore, JobDescription, JobStatus};
    use chrono::Utc;
    use jobtree_core::OwnerId;

    #[test]
    fn writes_arguments_to_main_slot() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let executor = SampleExecutor::new(blobs.clone());
        let job = Job::pending(
            &JobDescription::new(OwnerId::new(), "sample").with_arguments("ping"),
            None,
            Utc::now(),
        );
        let logger = JobLogger::new(&job);

        let outcome = executor.execute(&job.arguments, &job, &logger);

        assert_eq!(outcome.status, JobStatus::Finished);
        assert_eq!(outcome.storage_id, Some(job.main_blob_key()));
        let blob = blobs.get(&job.main_blob_key()).unwrap().unwrap();
        assert_eq!(blob.content, b"ping");
    }
}
