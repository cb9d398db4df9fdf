//! Miscellaneous solver state.
use parasat_formula::Lit;

/// Satisfiability state of a single worker.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SatState {
    Unknown,
    Sat,
    /// The frozen problem is unsatisfiable.
    Unsat,
    /// The current guiding path is exhausted, the problem may still have models elsewhere.
    UnsatUnderPath,
}

impl Default for SatState {
    fn default() -> SatState {
        SatState::Unknown
    }
}

/// Miscellaneous solver state.
///
/// Anything larger or any larger group of related state variables should be moved into a separate
/// part of [`Context`](crate::context::Context).
#[derive(Default)]
pub struct SolverState {
    pub sat_state: SatState,
    /// Set when a stop conflict was raised to unwind propagation on termination.
    pub stopped: bool,
    /// Conflict clause recorded by a constraint or post-propagator.
    ///
    /// Valid only while a conflict with the `External` variant is being analyzed.
    pub external_conflict: Vec<Lit>,
    /// Number of enumerator blocking clauses this worker has integrated.
    pub blocking_seen: usize,
}

impl SolverState {
    /// Forget a previously raised stop conflict.
    pub fn clear_stop(&mut self) {
        self.stopped = false;
    }
}
