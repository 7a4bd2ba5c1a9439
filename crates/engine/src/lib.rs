//! `jobtree-engine` — hierarchical background-job execution.
//!
//! Callers submit trees of [`jobs::JobDescription`]s to a
//! [`jobs::JobScheduler`]; a [`jobs::JobRunner`] executes eligible jobs with
//! executors resolved through the [`jobs::ExecutorRegistry`].

pub mod executors;
pub mod jobs;
