//! Archive composition: zips the outputs of a job's children.

use std::io::{Cursor, Write};
use std::sync::Arc;

use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use jobtree_core::JobId;

use crate::jobs::{
    BlobStore, BlobStoreError, ExecutorContext, Job, JobExecutor, JobLogger, JobOutcome,
    JobStatus, JobStore, JobStoreError,
};

#[derive(Debug, thiserror::Error)]
enum ArchiveError {
    #[error("child {0} is not finished ({1})")]
    ChildNotFinished(JobId, JobStatus),
    #[error("child {0} has no suggested file name")]
    MissingFileName(JobId),
    #[error("child {0} has an unsafe file name: {1:?}")]
    UnsafeFileName(JobId, String),
    #[error("child {0} has no readable output")]
    MissingOutput(JobId),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Blob(#[from] BlobStoreError),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether `name` can be used as an archive entry name.
///
/// Only plain file names pass: no path separators, no `..`, no drive prefix.
pub fn is_safe_entry_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\', ':'])
}

/// One archive member, checked before any content is read.
struct Source {
    child_id: JobId,
    name: String,
    key: String,
}

/// Executor for `archive` jobs.
///
/// Every child must be finished, carry a safe suggested file name and have a
/// stored primary artifact. The archive is assembled in memory and written
/// once, so a failure at any step leaves the job's slot empty.
pub struct ArchiveExecutor {
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
}

impl ArchiveExecutor {
    pub fn new(jobs: Arc<dyn JobStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { jobs, blobs }
    }

    /// Registry factory.
    pub fn factory(context: &ExecutorContext) -> anyhow::Result<Box<dyn JobExecutor>> {
        Ok(Box::new(Self::new(context.jobs.clone(), context.blobs.clone())))
    }

    fn collect_sources(&self, job: &Job) -> Result<Vec<Source>, ArchiveError> {
        let mut sources = Vec::new();
        for child in self.jobs.children_of(job.id)? {
            if child.status != JobStatus::Finished {
                return Err(ArchiveError::ChildNotFinished(child.id, child.status));
            }
            let name = child
                .suggested_file_name
                .filter(|n| !n.is_empty())
                .ok_or(ArchiveError::MissingFileName(child.id))?;
            if !is_safe_entry_name(&name) {
                return Err(ArchiveError::UnsafeFileName(child.id, name));
            }
            let key = child
                .storage_id
                .ok_or(ArchiveError::MissingOutput(child.id))?;
            if self.blobs.stat(&key)?.is_none() {
                return Err(ArchiveError::MissingOutput(child.id));
            }
            sources.push(Source {
                child_id: child.id,
                name,
                key,
            });
        }
        Ok(sources)
    }

    /// Zip the sources, holding one child's content at a time.
    fn build(&self, sources: &[Source]) -> Result<Vec<u8>, ArchiveError> {
        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for source in sources {
            let blob = self
                .blobs
                .get(&source.key)?
                .ok_or(ArchiveError::MissingOutput(source.child_id))?;
            zip.start_file(source.name.as_str(), options)?;
            zip.write_all(&blob.content)?;
        }

        Ok(zip.finish()?.into_inner())
    }

    fn archive(&self, job: &Job, logger: &JobLogger) -> Result<JobOutcome, ArchiveError> {
        let sources = self.collect_sources(job)?;
        if sources.is_empty() {
            logger.warn("no children to archive, writing an empty archive");
        }

        let bytes = self.build(&sources)?;
        let artifact = self.blobs.write(&job.main_blob_key(), &mut bytes.as_slice())?;
        logger.info(format!(
            "archived {} entries ({} bytes)",
            sources.len(),
            artifact.len
        ));
        Ok(JobOutcome::finished_with(&artifact))
    }
}

impl JobExecutor for ArchiveExecutor {
    fn execute(&self, _arguments: &str, job: &Job, logger: &JobLogger) -> JobOutcome {
        match self.archive(job, logger) {
            Ok(outcome) => outcome,
            Err(e) => {
                logger.error(format!("archive failed: {e}"));
                JobOutcome::failed()
            }
        }
    }
}
