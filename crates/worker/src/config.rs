//! Worker configuration loading.

use std::path::PathBuf;

use jobtree_engine::jobs::{JobRunnerConfig, RunnerConfigError};

pub const ENV_BLOB_DIR: &str = "JOBTREE_BLOB_DIR";

/// Worker configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Runner(#[from] RunnerConfigError),
    #[error("{ENV_BLOB_DIR} must not be empty")]
    EmptyBlobDir,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkerConfig {
    pub runner: JobRunnerConfig,
    /// Directory for artifacts; `None` keeps them in memory.
    pub blob_dir: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let runner = JobRunnerConfig::from_lookup(&lookup)?;
        let blob_dir = match lookup(ENV_BLOB_DIR) {
            Some(dir) if dir.trim().is_empty() => return Err(ConfigError::EmptyBlobDir),
            Some(dir) => Some(PathBuf::from(dir)),
            None => None,
        };
        Ok(Self { runner, blob_dir })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn unset_environment_uses_defaults() {
        let config = WorkerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.runner.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn blob_dir_is_read() {
        let config = WorkerConfig::from_lookup(|key| {
            (key == ENV_BLOB_DIR).then(|| "/var/lib/jobtree".to_string())
        })
        .unwrap();
        assert_eq!(config.blob_dir, Some(PathBuf::from("/var/lib/jobtree")));
    }

    #[test]
    fn invalid_values_are_reported() {
        assert_eq!(
            WorkerConfig::from_lookup(|key| (key == ENV_BLOB_DIR).then(String::new)),
            Err(ConfigError::EmptyBlobDir)
        );
        assert!(matches!(
            WorkerConfig::from_lookup(|key| {
                (key == "JOBTREE_POLL_INTERVAL_MS").then(|| "later".to_string())
            }),
            Err(ConfigError::Runner(_))
        ));
    }
}
