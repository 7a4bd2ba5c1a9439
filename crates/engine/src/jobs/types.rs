//! Core job types: persisted rows, submission trees, outcomes and queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobtree_core::{JobId, OwnerId};

use super::blob::{BlobDescriptor, MAIN_SLOT, blob_key};

/// Job execution status.
///
/// `Pending → Running → {Finished | Failed}`, plus `Pending → Failed` when a
/// child fails. `Unknown` is only ever reported by the unregistered-type
/// executor and is stored as `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Persisted, waiting for its children and a runner
    Pending,
    /// Claimed by exactly one runner
    Running,
    /// Completed successfully
    Finished,
    /// Failed (executor failure, dispatch failure or failed child)
    Failed,
    /// Executor could not be resolved for the job type
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Unknown
        )
    }

    /// `Unknown` counts as a failure for propagation.
    pub fn is_failure(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Unknown)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Finished)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    /// The status as it is written to the job store.
    pub fn persisted(self) -> JobStatus {
        match self {
            JobStatus::Unknown => JobStatus::Failed,
            other => other,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Unknown => "unknown",
        })
    }
}

/// A persisted unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Owning job; `None` for roots.
    pub parent_id: Option<JobId>,
    /// Blob key of the primary artifact, set once by a successful execution.
    pub storage_id: Option<String>,
    pub status: JobStatus,
    pub suggested_file_name: Option<String>,
    /// Executor key; `None` for containers that only aggregate children.
    pub job_type: Option<String>,
    /// Opaque payload handed verbatim to the executor.
    pub arguments: String,
    pub owner_id: OwnerId,
    pub creation_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Text log of the last execution attempt.
    pub log: Option<String>,
}

impl Job {
    /// Build the pending row for one node of a submitted tree.
    pub fn pending(
        description: &JobDescription,
        parent_id: Option<JobId>,
        creation_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            parent_id,
            storage_id: None,
            status: JobStatus::Pending,
            suggested_file_name: description.suggested_file_name.clone(),
            job_type: description.job_type.clone(),
            arguments: description.arguments.clone(),
            owner_id: description.owner_id,
            creation_time,
            updated_at: creation_time,
            log: None,
        }
    }

    pub fn is_container(&self) -> bool {
        self.job_type.is_none()
    }

    /// Key of this job's primary output slot.
    pub fn main_blob_key(&self) -> String {
        blob_key(self.id, MAIN_SLOT)
    }
}

/// A not-yet-persisted job tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescription {
    pub owner_id: OwnerId,
    pub suggested_file_name: Option<String>,
    pub job_type: Option<String>,
    pub arguments: String,
    pub children: Vec<JobDescription>,
}

impl JobDescription {
    /// A job of the given type with empty arguments and no children.
    pub fn new(owner_id: OwnerId, job_type: impl Into<String>) -> Self {
        Self {
            owner_id,
            suggested_file_name: None,
            job_type: Some(job_type.into()),
            arguments: String::new(),
            children: Vec::new(),
        }
    }

    /// A typeless job that finishes once all of its children have.
    pub fn container(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            suggested_file_name: None,
            job_type: None,
            arguments: String::new(),
            children: Vec::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = arguments.into();
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.suggested_file_name = Some(name.into());
        self
    }

    pub fn with_child(mut self, child: JobDescription) -> Self {
        self.children.push(child);
        self
    }

    /// Number of jobs in the tree, root included.
    pub fn job_count(&self) -> usize {
        1 + self.children.iter().map(JobDescription::job_count).sum::<usize>()
    }
}

/// What an executor reports for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub storage_id: Option<String>,
}

impl JobOutcome {
    pub fn finished() -> Self {
        Self {
            status: JobStatus::Finished,
            storage_id: None,
        }
    }

    /// Finished, with the artifact that was written for this job.
    pub fn finished_with(artifact: &BlobDescriptor) -> Self {
        Self {
            status: JobStatus::Finished,
            storage_id: Some(artifact.key.clone()),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: JobStatus::Failed,
            storage_id: None,
        }
    }

    pub fn unknown() -> Self {
        Self {
            status: JobStatus::Unknown,
            storage_id: None,
        }
    }
}

/// A guarded status write (see `JobStore::compare_and_set_status`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub storage_id: Option<String>,
    pub log: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: JobStatus) -> Self {
        Self {
            status,
            storage_id: None,
            log: None,
        }
    }

    pub fn with_storage_id(mut self, storage_id: impl Into<String>) -> Self {
        self.storage_id = Some(storage_id.into());
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }
}

/// Owner scope for lookups.
///
/// - `Any`: privileged view over every owner's jobs.
/// - `Owner`: only jobs submitted by that owner are visible.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OwnerFilter {
    Any,
    Owner(OwnerId),
}

impl OwnerFilter {
    pub fn allows(&self, owner_id: OwnerId) -> bool {
        match self {
            OwnerFilter::Any => true,
            OwnerFilter::Owner(o) => *o == owner_id,
        }
    }
}

/// Pagination parameters for job listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of jobs to return.
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(50).min(1000),
            offset: offset.unwrap_or(0),
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Total number of matching items across all pages.
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}
