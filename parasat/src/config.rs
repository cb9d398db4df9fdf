//! Solver configuration.

/// Restart schedule selection.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RestartConfig {
    /// `base * factor^i` conflicts between restarts.
    Geometric { base: u64, factor: f64 },
    /// The Luby sequence scaled by `scale`.
    Luby { scale: u64 },
    /// `base + step * i` conflicts between restarts.
    Arithmetic { base: u64, step: u64 },
    /// Glue-based dynamic restarts.
    ///
    /// Restart when the moving average over the last `window` glue values exceeds `k` times the
    /// global average. `k` is re-adjusted every `adjust_limit` conflicts.
    Dynamic {
        window: u32,
        k: f32,
        adjust_limit: u32,
    },
}

impl Default for RestartConfig {
    fn default() -> RestartConfig {
        RestartConfig::Dynamic {
            window: 50,
            k: 0.8,
            adjust_limit: 16000,
        }
    }
}

/// Configuration of the restart blocking filter.
///
/// A restart is suppressed while the current trail is longer than `scale` times the exponential
/// moving average (with smoothing window `window`) of trail sizes at conflicts. Only active after
/// `min_span` conflicts were observed.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BlockConfig {
    pub window: u32,
    pub scale: f64,
    pub min_span: u64,
}

impl Default for BlockConfig {
    fn default() -> BlockConfig {
        BlockConfig {
            window: 5000,
            scale: 1.4,
            min_span: 10000,
        }
    }
}

/// Receiver topology for lemma exchange.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Topology {
    All,
    Ring,
    Cube,
    CubeX,
}

/// Which distributor implementation carries the lemma exchange.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DistributorKind {
    /// One multicast queue shared by all workers.
    Global,
    /// A receive channel per worker, fanned out at publish time.
    Fanout,
}

/// Filter and bookkeeping parameters for lemma exchange.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IntegrationConfig {
    /// Largest clause size published.
    pub max_size: usize,
    /// Largest glue value published.
    pub max_glue: u32,
    /// Number of integrated clauses kept alive unconditionally.
    pub grace: usize,
    /// Receiver topology.
    pub topology: Topology,
    /// Upper bound on clauses received per propagation fixpoint.
    pub batch: usize,
    /// Distributor implementation.
    pub kind: DistributorKind,
}

impl Default for IntegrationConfig {
    fn default() -> IntegrationConfig {
        IntegrationConfig {
            max_size: 30,
            max_glue: 4,
            grace: 1024,
            topology: Topology::All,
            batch: 32,
            kind: DistributorKind::Global,
        }
    }
}

/// How multiple workers share the search space.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SolveMode {
    /// All workers start from the initial guiding path.
    Compete,
    /// One worker starts from the initial path, splitting supplies the rest.
    Split,
}

/// Configurable parameters used during solving.
#[derive(Clone, Debug)]
pub struct SolverConfig {
    /// Multiplicative decay for the VSIDS decision heuristic.
    pub vsids_decay: f32,
    /// Multiplicative decay for clause activities.
    pub clause_activity_decay: f32,
    /// Restart schedule.
    pub restart: RestartConfig,
    /// Restart blocking filter, disabled when `None`.
    pub block_restart: Option<BlockConfig>,
    /// Conflicts before the first learnt-clause reduction.
    pub reduce_base: u64,
    /// Increment of the reduction interval after every reduction.
    pub reduce_inc: u64,
    /// Fraction of learnt clauses removed by a reduction.
    pub reduce_fraction: f64,
    /// Clauses with a glue at most this are never removed.
    pub glue_keep: u32,
    /// Upper bound on learnt long clauses, forces a reduction when exceeded.
    pub learnt_limit: Option<u64>,
    /// Soft memory budget for the learnt allocator in bytes.
    pub memory_limit: Option<u64>,
    /// Overall conflict budget of a run.
    pub conflict_limit: Option<u64>,
    /// Number of worker threads, `None` for one per hardware thread.
    pub threads: Option<usize>,
    /// Search-space sharing mode.
    pub mode: SolveMode,
    /// Lemma exchange parameters.
    pub integration: IntegrationConfig,
    /// Enable lemma exchange between workers.
    pub distribute: bool,
    /// Number of models to enumerate, `None` for all.
    pub max_models: Option<u64>,
}

impl Default for SolverConfig {
    fn default() -> SolverConfig {
        SolverConfig {
            vsids_decay: 0.95,
            clause_activity_decay: 0.999,
            restart: RestartConfig::default(),
            block_restart: Some(BlockConfig::default()),
            reduce_base: 2000,
            reduce_inc: 300,
            reduce_fraction: 0.5,
            glue_keep: 3,
            learnt_limit: None,
            memory_limit: None,
            conflict_limit: None,
            threads: Some(1),
            mode: SolveMode::Compete,
            integration: IntegrationConfig::default(),
            distribute: true,
            max_models: Some(1),
        }
    }
}

impl SolverConfig {
    /// Effective worker count.
    ///
    /// Bounded by 64 as worker sets are kept in single-word bitmasks.
    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1).min(64)
    }
}
