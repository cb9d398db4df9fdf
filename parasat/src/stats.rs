//! Per-worker solving statistics.

/// Counters kept by every worker.
///
/// The coordinator accumulates these over all workers when a run finishes.
#[derive(Default, Debug, Clone)]
pub struct SolverStats {
    /// Decisions made.
    pub decisions: u64,
    /// Literals propagated (queue pops).
    pub propagations: u64,
    /// Conflicts found.
    pub conflicts: u64,
    /// Conflicts analyzed (excludes stop conflicts).
    pub analyzed: u64,
    /// Restarts performed.
    pub restarts: u64,
    /// Restarts suppressed by the blocking filter.
    pub blocked_restarts: u64,
    /// Long learnt clauses currently in the database.
    pub learnt_clauses: u64,
    /// Learnt clauses deleted by reduction.
    pub deleted_clauses: u64,
    /// Clause database reductions.
    pub reductions: u64,
    /// Lemmas published to the distributor.
    pub published: u64,
    /// Lemmas received and integrated.
    pub integrated: u64,
    /// Received lemmas that were unit on integration.
    pub integrated_asserting: u64,
    /// Guiding paths split off for other workers.
    pub splits: u64,
    /// Models found by this worker.
    pub models: u64,
}

impl SolverStats {
    /// Add the counters of another worker.
    pub fn accumulate(&mut self, other: &SolverStats) {
        self.decisions += other.decisions;
        self.propagations += other.propagations;
        self.conflicts += other.conflicts;
        self.analyzed += other.analyzed;
        self.restarts += other.restarts;
        self.blocked_restarts += other.blocked_restarts;
        self.learnt_clauses += other.learnt_clauses;
        self.deleted_clauses += other.deleted_clauses;
        self.reductions += other.reductions;
        self.published += other.published;
        self.integrated += other.integrated;
        self.integrated_asserting += other.integrated_asserting;
        self.splits += other.splits;
        self.models += other.models;
    }
}
