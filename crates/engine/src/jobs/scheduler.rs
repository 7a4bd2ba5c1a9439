//! Job scheduler: submission, eligibility and failure propagation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use jobtree_core::{DomainError, DomainResult, JobId};

use super::blob::{Blob, BlobStore, BlobStoreError};
use super::executor::ExecutorContext;
use super::runner::JobNotifier;
use super::store::{JobStats, JobStore, JobStoreError};
use super::types::{
    Job, JobDescription, JobStatus, OwnerFilter, Page, Pagination, StatusUpdate,
};
use crate::executors::{is_safe_entry_name, job_types};

/// Submission error.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] DomainError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Scheduler error.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Blob(#[from] BlobStoreError),
}

/// Persists job trees and decides which job runs next.
pub struct JobScheduler {
    jobs: Arc<dyn JobStore>,
    blobs: Arc<dyn BlobStore>,
    /// Job types whose children are addressed by suggested file name.
    named_children: HashSet<String>,
    notifier: Option<JobNotifier>,
}

impl JobScheduler {
    pub fn new(jobs: Arc<dyn JobStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            jobs,
            blobs,
            named_children: HashSet::from([job_types::ARCHIVE.to_string()]),
            notifier: None,
        }
    }

    /// Replace the set of job types whose children need unique file names.
    pub fn with_named_children<I, S>(mut self, job_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.named_children = job_types.into_iter().map(Into::into).collect();
        self
    }

    /// Wake a runner whenever a tree is submitted.
    pub fn with_notifier(mut self, notifier: JobNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn executor_context(&self) -> ExecutorContext {
        ExecutorContext::new(self.jobs.clone(), self.blobs.clone())
    }

    /// Validate and persist a whole job tree; returns the root's id.
    ///
    /// Nothing is stored unless the entire tree is valid.
    pub fn submit(&self, description: JobDescription) -> Result<JobId, SubmitError> {
        self.validate(&description)?;

        let mut rows = Vec::with_capacity(description.job_count());
        let root = flatten(&description, None, Utc::now(), &mut rows);
        let count = rows.len();
        self.jobs.insert_tree(rows)?;

        info!(
            job_id = %root,
            job_type = ?description.job_type,
            owner_id = %description.owner_id,
            jobs = count,
            "job tree submitted"
        );
        if let Some(notifier) = &self.notifier {
            notifier.wake();
        }
        Ok(root)
    }

    fn validate(&self, description: &JobDescription) -> DomainResult<()> {
        if let Some(job_type) = &description.job_type {
            if job_type.trim().is_empty() {
                return Err(DomainError::validation("job type must not be empty"));
            }
            if self.named_children.contains(job_type) {
                let mut seen = HashSet::new();
                for child in &description.children {
                    let name = child
                        .suggested_file_name
                        .as_deref()
                        .filter(|n| !n.is_empty())
                        .ok_or_else(|| {
                            DomainError::validation(format!(
                                "children of a {job_type} job need a suggested file name"
                            ))
                        })?;
                    if !is_safe_entry_name(name) {
                        return Err(DomainError::validation(format!(
                            "file name {name:?} under a {job_type} job must not contain a path"
                        )));
                    }
                    if !seen.insert(name) {
                        return Err(DomainError::validation(format!(
                            "duplicate file name {name:?} under a {job_type} job"
                        )));
                    }
                }
            }
        }
        description
            .children
            .iter()
            .try_for_each(|child| self.validate(child))
    }

    /// Pick the next job to run, failing blocked jobs along the way.
    ///
    /// A pending job is eligible once every direct child is `Finished`.
    /// Deeper jobs win; ties go to the oldest. A pending job with a failed
    /// child is failed here and never returned.
    pub fn find_eligible(&self) -> Result<Option<Job>, SchedulerError> {
        let pending = self.jobs.list_by_status(JobStatus::Pending)?;
        let mut depths = HashMap::new();
        let mut best: Option<(usize, Job)> = None;

        for job in pending {
            let children = self.jobs.children_of(job.id)?;
            if let Some(failed) = children.iter().find(|c| c.status.is_failure()) {
                self.fail_blocked(&job, failed)?;
                continue;
            }
            if !children.iter().all(|c| c.status == JobStatus::Finished) {
                continue;
            }

            let depth = self.depth_of(&job, &mut depths)?;
            if best.as_ref().is_none_or(|(d, _)| depth > *d) {
                best = Some((depth, job));
            }
        }

        Ok(best.map(|(_, job)| job))
    }

    fn depth_of(
        &self,
        job: &Job,
        cache: &mut HashMap<JobId, usize>,
    ) -> Result<usize, JobStoreError> {
        let mut chain = Vec::new();
        let mut base = 0;
        let mut next = job.parent_id;

        while let Some(id) = next {
            if let Some(depth) = cache.get(&id) {
                base = depth + 1;
                break;
            }
            chain.push(id);
            next = self.jobs.get(id)?.and_then(|parent| parent.parent_id);
        }

        // `chain` runs from the nearest ancestor upward.
        for (i, id) in chain.iter().rev().enumerate() {
            cache.insert(*id, base + i);
        }
        let depth = base + chain.len();
        cache.insert(job.id, depth);
        Ok(depth)
    }

    fn fail_blocked(&self, job: &Job, failed_child: &Job) -> Result<(), SchedulerError> {
        let update = StatusUpdate::to(JobStatus::Failed).with_log(format!(
            "dependency failed: child {} is {}",
            failed_child.id, failed_child.status
        ));
        if self
            .jobs
            .compare_and_set_status(job.id, JobStatus::Pending, update)?
        {
            warn!(job_id = %job.id, child_id = %failed_child.id, "job failed by dependency");
            self.propagate_failure(job.id)?;
        }
        Ok(())
    }

    /// Fail every still-pending ancestor of `job_id`; returns how many.
    pub fn propagate_failure(&self, job_id: JobId) -> Result<usize, SchedulerError> {
        let mut failed = 0;
        let mut current = job_id;

        while let Some(parent_id) = self.jobs.get(current)?.and_then(|j| j.parent_id) {
            let update = StatusUpdate::to(JobStatus::Failed)
                .with_log(format!("dependency failed: child {current} failed"));
            if !self
                .jobs
                .compare_and_set_status(parent_id, JobStatus::Pending, update)?
            {
                break;
            }
            debug!(job_id = %parent_id, child_id = %current, "propagated failure");
            failed += 1;
            current = parent_id;
        }

        Ok(failed)
    }

    /// Direct children of a job, in submission order.
    pub fn children_of(&self, job_id: JobId) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.jobs.children_of(job_id)?)
    }

    /// A job, if it exists and is visible through `filter`.
    pub fn find_by_id(
        &self,
        job_id: JobId,
        filter: OwnerFilter,
    ) -> Result<Option<Job>, SchedulerError> {
        Ok(self
            .jobs
            .get(job_id)?
            .filter(|job| filter.allows(job.owner_id)))
    }

    /// Jobs visible through `filter`, newest first.
    pub fn list_by_owner(
        &self,
        filter: OwnerFilter,
        pagination: Pagination,
    ) -> Result<Page<Job>, SchedulerError> {
        Ok(self.jobs.list_by_owner(filter, pagination)?)
    }

    /// Log text of a job's last attempt.
    pub fn log_of(
        &self,
        job_id: JobId,
        filter: OwnerFilter,
    ) -> Result<Option<String>, SchedulerError> {
        Ok(self.find_by_id(job_id, filter)?.and_then(|job| job.log))
    }

    /// Primary artifact of a finished job.
    pub fn artifact_of(
        &self,
        job_id: JobId,
        filter: OwnerFilter,
    ) -> Result<Option<Blob>, SchedulerError> {
        let Some(job) = self.find_by_id(job_id, filter)? else {
            return Ok(None);
        };
        match (job.status, job.storage_id) {
            (JobStatus::Finished, Some(key)) => Ok(self.blobs.get(&key)?),
            _ => Ok(None),
        }
    }

    pub fn stats(&self) -> Result<JobStats, SchedulerError> {
        Ok(self.jobs.stats()?)
    }
}

/// Append `description` and its subtree to `rows`, parents first.
fn flatten(
    description: &JobDescription,
    parent_id: Option<JobId>,
    now: DateTime<Utc>,
    rows: &mut Vec<Job>,
) -> JobId {
    let job = Job::pending(description, parent_id, now);
    let id = job.id;
    rows.push(job);
    for child in &description.children {
        flatten(child, Some(id), now, rows);
    }
    id
}
