//! Per-job logger handed to executors.

use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use tracing::{error, info, warn};

use jobtree_core::JobId;

use super::types::Job;

/// Forwards every line to `tracing` (tagged with the job) and keeps a copy
/// so the runner can store it as the job's log.
#[derive(Debug)]
pub struct JobLogger {
    job_id: JobId,
    job_type: Option<String>,
    lines: Mutex<Vec<String>>,
}

impl JobLogger {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(job_id = %self.job_id, job_type = ?self.job_type, "{message}");
        self.push("INFO", message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!(job_id = %self.job_id, job_type = ?self.job_type, "{message}");
        self.push("WARN", message);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!(job_id = %self.job_id, job_type = ?self.job_type, "{message}");
        self.push("ERROR", message);
    }

    /// Lines recorded so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The whole log as text, or `None` if nothing was logged.
    pub fn into_text(self) -> Option<String> {
        let lines = self
            .lines
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    fn push(&self, level: &str, message: &str) {
        let line = format!(
            "{} {level:<5} {message}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobDescription;
    use jobtree_core::OwnerId;

    fn logger() -> JobLogger {
        let job = Job::pending(
            &JobDescription::new(OwnerId::new(), "sample"),
            None,
            Utc::now(),
        );
        JobLogger::new(&job)
    }

    #[test]
    fn lines_keep_level_and_order() {
        let log = logger();
        log.info("starting");
        log.warn("slow");
        log.error("broken");

        let lines = log.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("INFO  starting"));
        assert!(lines[1].ends_with("WARN  slow"));
        assert!(lines[2].ends_with("ERROR broken"));
    }

    #[test]
    fn empty_log_has_no_text() {
        assert_eq!(logger().into_text(), None);

        let log = logger();
        log.info("one");
        log.info("two");
        let text = log.into_text().unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
