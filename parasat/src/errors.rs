//! Error kinds surfaced by the core.
use thiserror::Error;

/// Errors that abort a solve run.
///
/// Workers record their own error in a per-worker slot. On join the coordinator re-raises the
/// lowest-numbered one, unless the failing worker could be removed from the pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// An allocation budget was exceeded inside the core.
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    /// A precondition violation, e.g. adding constraints to a frozen problem.
    #[error("logic error: {0}")]
    Logic(String),
    /// An unexpected internal inconsistency.
    #[error("runtime error: {0}")]
    Runtime(String),
    /// An error that could not be classified, e.g. a worker panic payload of unknown type.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CoreError {
    /// Shortcut for a [`CoreError::Logic`] wrapped in `Err`.
    pub fn logic<T>(msg: impl Into<String>) -> Result<T, CoreError> {
        Err(CoreError::Logic(msg.into()))
    }
}

/// Final state of a solve run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SolveResult {
    /// A model was found (and committed).
    Sat,
    /// The problem is unsatisfiable.
    Unsat,
    /// The run was interrupted from the outside before a result was established.
    Interrupted,
    /// A conflict, memory or learnt budget was exhausted.
    Exhausted,
}

impl SolveResult {
    /// Whether this result settles satisfiability.
    pub fn is_conclusive(self) -> bool {
        matches!(self, SolveResult::Sat | SolveResult::Unsat)
    }
}
