use thiserror::Error;

use crate::task::TaskFailure;

/// Errors raised while building or freezing a graph.  None of them are retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A node with the same key already exists
    #[error("duplicate task key `{key}`")]
    DuplicateKey {
        /// Offending key
        key: String
    },

    /// An explicit key has the form of a generated one, `Input<id=..>` or `Task<id=..>`
    #[error("task key `{key}` uses the generated key form")]
    ReservedKey {
        /// Offending key
        key: String
    },

    /// A node references a key that is not part of the graph
    #[error("task `{node}` references unknown task `{dependency}`")]
    MissingDependency {
        /// Referencing task
        node: String,
        /// Key that could not be found
        dependency: String
    },

    /// The references form a cycle passing through `key`
    #[error("cycle detected through task `{key}`")]
    Cycle {
        /// A task on the cycle
        key: String
    },
}

/// Errors raised while running a graph
#[derive(Debug, Error)]
pub enum ExecError {
    /// The graph failed validation
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// An output was requested that the graph does not contain
    #[error("requested task `{key}` is not part of the graph")]
    UnknownTarget {
        /// Requested key
        key: String
    },

    /// A task exhausted its attempts or failed fatally.
    #[error("task `{key}` failed after {attempts} attempt(s) ({cancelled} dependent task(s) cancelled): {cause}")]
    TaskExecution {
        /// The failing task
        key: String,
        /// Runs made, the last one included
        attempts: usize,
        /// Transitive dependents that were not run
        cancelled: usize,
        /// Last failure raised by the task
        cause: TaskFailure,
    },

    /// A requested output was not produced by the run
    #[error("output of task `{key}` was never produced")]
    MissingOutput {
        /// Requested key
        key: String
    },

    /// An output did not have the requested type
    #[error("output of task `{key}` is not a `{expected}`")]
    TypeMismatch {
        /// Requested key
        key: String,
        /// Name of the requested type
        expected: &'static str
    },

    /// The rayon pool of the leveled scheduler could not be built
    #[error("unable to start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl ExecError {
    /// The failure raised by the task, when the run failed inside one
    pub fn task_failure(&self) -> Option<&TaskFailure> {
        match self {
            ExecError::TaskExecution { cause, .. } => Some(cause),
            _ => None
        }
    }
}

/// Errors raised while reading an `ExecutorConfig`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held an unusable value
    #[error("invalid value `{value}` for {var}: {reason}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Value as read
        value: String,
        /// Why it was rejected
        reason: String
    },
}
