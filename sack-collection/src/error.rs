use sack::ExecError;
use thiserror::Error;

/// Raised by `pluck` when an element has no such field and no default was given.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("field `{field}` is missing")]
pub struct FieldAccessError {
    /// Requested field
    pub field: String,
}

/// Raised when the elements handed to a tabular sink do not share one shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("cannot infer schema at row {row}: {reason}")]
pub struct SchemaInferenceError {
    /// Index of the first offending element
    pub row: usize,
    /// What did not line up
    pub reason: String,
}

/// Errors surfaced by collection operations
#[derive(Debug, Error)]
pub enum BagError {
    /// A task failed or the graph could not be run
    #[error(transparent)]
    Exec(ExecError),

    /// An element lacked a plucked field
    #[error(transparent)]
    FieldAccess(#[from] FieldAccessError),

    /// Records could not be laid out as a table
    #[error(transparent)]
    SchemaInference(#[from] SchemaInferenceError),

    /// A source pattern matched nothing
    #[error("no input matches `{pattern}`")]
    SourceNotFound {
        /// Pattern or path as given
        pattern: String
    },

    #[allow(missing_docs)]
    #[error("invalid source pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[allow(missing_docs)]
    #[error("unable to list source: {0}")]
    Glob(#[from] glob::GlobError),

    /// Reading a source failed before any task ran
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// Data shape errors travel through the scheduler as task failures; restore them here.
impl From<ExecError> for BagError {
    fn from(err: ExecError) -> Self {
        if let Some(failure) = err.task_failure() {
            if let Some(e) = failure.downcast_ref::<FieldAccessError>() {
                return BagError::FieldAccess(e.clone());
            }
            if let Some(e) = failure.downcast_ref::<SchemaInferenceError>() {
                return BagError::SchemaInference(e.clone());
            }
        }
        BagError::Exec(err)
    }
}
