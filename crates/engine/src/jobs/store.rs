//! Job storage implementations.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use serde::Serialize;

use jobtree_core::JobId;

use super::types::{Job, JobStatus, OwnerFilter, Page, Pagination, StatusUpdate};

/// Job store abstraction.
///
/// The store is the single source of truth for job status and the only
/// synchronization point between runners: claims go through
/// [`JobStore::compare_and_set_status`].
pub trait JobStore: Send + Sync {
    /// Insert every row of a job tree, or none of them.
    ///
    /// Rows must be ordered parents first; a row's parent must already be
    /// stored or appear earlier in the batch.
    fn insert_tree(&self, jobs: Vec<Job>) -> Result<(), JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Direct children of a job, in submission order.
    fn children_of(&self, job_id: JobId) -> Result<Vec<Job>, JobStoreError>;

    /// All jobs with the given status, oldest first.
    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError>;

    /// Jobs visible through `filter`, newest first.
    fn list_by_owner(
        &self,
        filter: OwnerFilter,
        pagination: Pagination,
    ) -> Result<Page<Job>, JobStoreError>;

    /// Apply `update` only if the job is currently in `expected`.
    ///
    /// Returns `Ok(false)` when the job has moved on (e.g. another runner
    /// claimed it first). Transitions the state machine forbids are errors.
    fn compare_and_set_status(
        &self,
        job_id: JobId,
        expected: JobStatus,
        update: StatusUpdate,
    ) -> Result<bool, JobStoreError>;

    /// Count jobs per status.
    fn stats(&self) -> Result<JobStats, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("parent {parent} of job {job} does not exist")]
    MissingParent { job: JobId, parent: JobId },
    #[error("invalid status transition for job {job}: {from} -> {to}")]
    InvalidTransition {
        job: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("storage id of job {0} is already set")]
    StorageIdAlreadySet(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct JobTable {
    jobs: HashMap<JobId, Job>,
    /// Parent → children, in insertion order.
    children: HashMap<JobId, Vec<JobId>>,
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    table: RwLock<JobTable>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, JobTable>, JobStoreError> {
        self.table
            .read()
            .map_err(|_| JobStoreError::Storage("job table lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, JobTable>, JobStoreError> {
        self.table
            .write()
            .map_err(|_| JobStoreError::Storage("job table lock poisoned".to_string()))
    }
}

impl JobStore for InMemoryJobStore {
    fn insert_tree(&self, jobs: Vec<Job>) -> Result<(), JobStoreError> {
        let mut table = self.write()?;

        // Validate the whole batch before touching the table.
        let mut batch = HashSet::with_capacity(jobs.len());
        for job in &jobs {
            if table.jobs.contains_key(&job.id) || !batch.insert(job.id) {
                return Err(JobStoreError::AlreadyExists(job.id));
            }
            if let Some(parent) = job.parent_id {
                if !batch.contains(&parent) && !table.jobs.contains_key(&parent) {
                    return Err(JobStoreError::MissingParent {
                        job: job.id,
                        parent,
                    });
                }
            }
        }

        for job in jobs {
            if let Some(parent) = job.parent_id {
                table.children.entry(parent).or_default().push(job.id);
            }
            table.jobs.insert(job.id, job);
        }
        Ok(())
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.read()?.jobs.get(&job_id).cloned())
    }

    fn children_of(&self, job_id: JobId) -> Result<Vec<Job>, JobStoreError> {
        let table = self.read()?;
        let children: Vec<Job> = table
            .children
            .get(&job_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| table.jobs.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(children)
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, JobStoreError> {
        let table = self.read()?;
        let mut result: Vec<_> = table
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.creation_time, j.id));
        Ok(result)
    }

    fn list_by_owner(
        &self,
        filter: OwnerFilter,
        pagination: Pagination,
    ) -> Result<Page<Job>, JobStoreError> {
        let table = self.read()?;
        let mut matching: Vec<&Job> = table
            .jobs
            .values()
            .filter(|j| filter.allows(j.owner_id))
            .collect();

        matching.sort_by(|a, b| (b.creation_time, b.id).cmp(&(a.creation_time, a.id)));

        let total = matching.len() as u64;
        let items: Vec<Job> = matching
            .into_iter()
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect();
        let has_more = u64::from(pagination.offset) + (items.len() as u64) < total;

        Ok(Page {
            items,
            total,
            pagination,
            has_more,
        })
    }

    fn compare_and_set_status(
        &self,
        job_id: JobId,
        expected: JobStatus,
        update: StatusUpdate,
    ) -> Result<bool, JobStoreError> {
        let mut table = self.write()?;
        let job = table
            .jobs
            .get_mut(&job_id)
            .ok_or(JobStoreError::NotFound(job_id))?;

        if job.status != expected {
            return Ok(false);
        }
        if !expected.can_transition_to(update.status) {
            return Err(JobStoreError::InvalidTransition {
                job: job_id,
                from: expected,
                to: update.status,
            });
        }
        if update.storage_id.is_some() && job.storage_id.is_some() {
            return Err(JobStoreError::StorageIdAlreadySet(job_id));
        }

        job.status = update.status;
        if let Some(storage_id) = update.storage_id {
            job.storage_id = Some(storage_id);
        }
        if let Some(log) = update.log {
            job.log = Some(log);
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let table = self.read()?;
        let mut stats = JobStats::default();

        for job in table.jobs.values() {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Finished => stats.finished += 1,
                JobStatus::Failed | JobStatus::Unknown => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}
