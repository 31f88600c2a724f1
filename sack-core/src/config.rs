use std::env;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const WORKERS_VAR: &str = "SACK_WORKERS";
const MAX_ATTEMPTS_VAR: &str = "SACK_MAX_ATTEMPTS";

/// Knobs shared by every scheduler.
///
/// `workers` bounds how many tasks run at once and `max_attempts` is the total
/// number of times a task is run before its failure is reported.  Both are
/// clamped to at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently running tasks
    pub workers: usize,
    /// Total runs of a task, the first one included
    pub max_attempts: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            max_attempts: 3,
        }
    }
}

impl ExecutorConfig {
    /// Sets the size of the worker pool
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the number of attempts a task gets
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Reads `SACK_WORKERS` and `SACK_MAX_ATTEMPTS`, falling back to the defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup<L: Fn(&'static str) -> Option<String>>(lookup: L) -> Result<Self, ConfigError> {
        let mut config = ExecutorConfig::default();
        if let Some(v) = lookup(WORKERS_VAR) {
            config.workers = parse_positive(WORKERS_VAR, &v)?;
        }
        if let Some(v) = lookup(MAX_ATTEMPTS_VAR) {
            config.max_attempts = parse_positive(MAX_ATTEMPTS_VAR, &v)?;
        }
        Ok(config)
    }

    pub(crate) fn normalized(self) -> Self {
        ExecutorConfig {
            workers: self.workers.max(1),
            max_attempts: self.max_attempts.max(1),
        }
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        var,
        value: value.to_owned(),
        reason
    };
    match value.trim().parse::<usize>() {
        Ok(0) => Err(invalid("must be at least 1".into())),
        Ok(n) => Ok(n),
        Err(e) => Err(invalid(e.to_string()))
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    #[test]
    fn test_lookup_overrides_defaults() {
        let config = ExecutorConfig::from_lookup(|var| match var {
            "SACK_WORKERS" => Some("4".into()),
            _ => None
        }).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_zero_is_rejected() {
        let err = ExecutorConfig::from_lookup(|var| match var {
            "SACK_MAX_ATTEMPTS" => Some("0".into()),
            _ => None
        }).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SACK_MAX_ATTEMPTS", .. }));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = ExecutorConfig::from_lookup(|_| Some("many".into())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "SACK_WORKERS", .. }));
    }
}
