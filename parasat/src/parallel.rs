//! The parallel portfolio and guiding-path coordinator.
//!
//! One master (worker 0) and up to N-1 clients each run their own CDCL solver over the shared
//! frozen problem. The coordinator multiplexes the search space through guiding paths, drives
//! synchronized restarts over a barrier, exchanges lemmas through the distributor and serializes
//! model and unsat commits. Workers observe coordination through their message handler, which is
//! registered as a post-propagator and checked at every propagation fixpoint.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, info, warn};

use parking_lot::Mutex;

use parasat_formula::{CnfFormula, Lit, Var};

use crate::config::{DistributorKind, SolverConfig};
use crate::dist::{Fanout, GlobalQueue, WorkerId};
use crate::enumerate::{Enumerator, Model};
use crate::errors::{CoreError, SolveResult};
use crate::post::PostPropagator;
use crate::search::SearchOutcome;
use crate::shared::SharedContext;
use crate::solver::Solver;
use crate::state::SatState;
use crate::stats::SolverStats;
use crate::vars::{VarFlags, VarKind};

pub mod control;
pub mod handler;

use control::{flags, SharedData, EXHAUSTED};
use handler::ParallelHandler;

/// A handle that can interrupt a running solve from any thread.
///
/// Interrupting is idempotent and safe to call at any time; blocked workers are deliberately not
/// woken to avoid a deadlock on the work semaphore, they observe the termination on their next
/// barrier exit.
#[derive(Clone)]
pub struct Interrupter {
    current: Arc<Mutex<Option<Arc<SharedData>>>>,
    pre: Arc<AtomicBool>,
}

impl Interrupter {
    /// Post `terminate|interrupt`.
    pub fn interrupt(&self) {
        self.pre.store(true, Ordering::SeqCst);
        if let Some(data) = &*self.current.lock() {
            data.terminate(false, true);
        }
    }
}

/// The parallel solver a driver interacts with.
///
/// The driver pushes variables and constraints, freezes the problem with `end_init` and then
/// either solves single-shot or iterates models. Between incremental steps `unfreeze` re-opens
/// the problem.
pub struct ParallelSolver {
    config: SolverConfig,
    shared: Arc<SharedContext>,
    threads: Vec<JoinHandle<SolverStats>>,
    current: Arc<Mutex<Option<Arc<SharedData>>>>,
    pre_interrupt: Arc<AtomicBool>,
    last: Option<Arc<SharedData>>,
    stats: SolverStats,
}

impl Default for ParallelSolver {
    fn default() -> ParallelSolver {
        ParallelSolver::new(SolverConfig::default())
    }
}

impl ParallelSolver {
    pub fn new(config: SolverConfig) -> ParallelSolver {
        ParallelSolver {
            config,
            shared: Arc::new(SharedContext::new()),
            threads: vec![],
            current: Arc::new(Mutex::new(None)),
            pre_interrupt: Arc::new(AtomicBool::new(false)),
            last: None,
            stats: SolverStats::default(),
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    fn builder(&mut self) -> Result<&mut SharedContext, CoreError> {
        Arc::get_mut(&mut self.shared)
            .ok_or_else(|| CoreError::Logic("problem modified while workers are attached".into()))
    }

    /// Add fresh input variables, returning the first one.
    pub fn add_vars(&mut self, count: usize) -> Result<Var, CoreError> {
        self.builder()?
            .add_vars(count, VarKind::Hybrid, VarFlags::INPUT)
    }

    /// Add fresh variables with explicit metadata.
    pub fn add_vars_with(
        &mut self,
        count: usize,
        kind: VarKind,
        vflags: VarFlags,
    ) -> Result<Var, CoreError> {
        self.builder()?.add_vars(count, kind, vflags)
    }

    /// Start the constraint-adding phase of the current step.
    pub fn start_add_constraints(&mut self) -> Result<(), CoreError> {
        self.builder()?.start_add_constraints()
    }

    /// Add a problem clause.
    pub fn add_clause(&mut self, lits: &[Lit]) -> Result<(), CoreError> {
        self.builder()?.add_clause(lits)
    }

    /// Add all clauses of a formula, declaring missing variables.
    pub fn add_formula(&mut self, formula: &CnfFormula) -> Result<(), CoreError> {
        let missing = formula.var_count().saturating_sub(self.shared.var_count());
        if missing > 0 {
            self.add_vars(missing)?;
        }
        for clause in formula.iter() {
            self.add_clause(clause)?;
        }
        Ok(())
    }

    /// Freeze the problem for solving.
    pub fn end_init(&mut self) -> Result<(), CoreError> {
        let config = self.config.clone();
        let threads = config.thread_count();

        let shared = self.builder()?;
        shared.set_concurrency(threads);

        if threads > 1 && config.distribute {
            let dist: Arc<dyn crate::dist::Distribute> = match config.integration.kind {
                DistributorKind::Global => GlobalQueue::new(&config.integration, threads),
                DistributorKind::Fanout => Fanout::new(&config.integration, threads),
            };
            shared.set_distributor(Some(dist));
        } else {
            shared.set_distributor(None);
        }

        shared.end_init()
    }

    /// Re-open the frozen problem for another incremental step.
    pub fn unfreeze(&mut self) -> Result<(), CoreError> {
        self.builder()?.unfreeze();
        Ok(())
    }

    /// A handle for interrupting this solver from other threads.
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            current: Arc::clone(&self.current),
            pre: Arc::clone(&self.pre_interrupt),
        }
    }

    /// Check the satisfiability of the frozen problem under the given guiding path.
    ///
    /// Models are collected and available through [`ParallelSolver::models`] afterwards.
    pub fn solve(&mut self, path: &[Lit]) -> Result<SolveResult, CoreError> {
        self.ensure_frozen()?;

        let enumerator = Enumerator::collecting(self.config.max_models);
        let data = self.launch(path, enumerator);
        let result = self.finish(&data);
        self.last = Some(data);
        result
    }

    /// Start solving and iterate models one at a time.
    pub fn start_solve(&mut self, path: &[Lit]) -> Result<ModelIter<'_>, CoreError> {
        self.ensure_frozen()?;

        let enumerator = Enumerator::streaming(self.config.max_models);
        let data = self.launch(path, enumerator);
        self.last = Some(Arc::clone(&data));
        Ok(ModelIter { solver: self, data })
    }

    /// The models of the last single-shot run.
    pub fn models(&self) -> Vec<Model> {
        self.last
            .as_ref()
            .map(|data| data.enumerator.models())
            .unwrap_or_default()
    }

    /// Accumulated statistics over all workers of all runs.
    pub fn stats(&self) -> &SolverStats {
        &self.stats
    }

    /// Interrupt a running solve and join all workers.
    pub fn shutdown(&mut self) {
        if let Some(data) = self.current.lock().clone() {
            data.enumerator.close();
            data.terminate(false, true);
        }
        self.join_workers();
        *self.current.lock() = None;
    }

    fn ensure_frozen(&mut self) -> Result<(), CoreError> {
        if !self.shared.is_frozen() {
            self.end_init()?;
        }
        Ok(())
    }

    fn launch(&mut self, path: &[Lit], enumerator: Enumerator) -> Arc<SharedData> {
        debug_assert!(self.threads.is_empty());

        let data = Arc::new(SharedData::new(&self.config, path.to_vec(), enumerator));
        *self.current.lock() = Some(Arc::clone(&data));

        if self.pre_interrupt.load(Ordering::SeqCst) {
            data.terminate(false, true);
        }

        info!(
            "starting {} worker(s), mode {:?}",
            data.threads, self.config.mode
        );

        for id in 0..data.threads {
            let shared = Arc::clone(&self.shared);
            let data = Arc::clone(&data);
            let config = self.config.clone();

            self.threads.push(
                std::thread::Builder::new()
                    .name(format!("parasat-worker-{}", id))
                    .spawn(move || worker_main(shared, data, config, id))
                    .expect("failed to spawn worker thread"),
            );
        }

        data
    }

    fn join_workers(&mut self) {
        for handle in self.threads.drain(..) {
            match handle.join() {
                Ok(stats) => self.stats.accumulate(&stats),
                Err(_) => (),
            }
        }
    }

    fn finish(&mut self, data: &Arc<SharedData>) -> Result<SolveResult, CoreError> {
        self.join_workers();
        *self.current.lock() = None;
        self.pre_interrupt.store(false, Ordering::SeqCst);

        let errors = data.errors.lock();
        let first_error = errors
            .iter()
            .enumerate()
            .find_map(|(id, slot)| slot.clone().map(|error| (id, error)));

        if let Some((id, error)) = first_error {
            let all_failed = errors.iter().all(|slot| slot.is_some());
            if id == 0 || all_failed {
                return Err(error);
            }
            warn!("worker {} failed and was removed: {}", id, error);
        }
        drop(errors);

        let models = data.enumerator.model_count();
        let winner = data.winner.load(Ordering::SeqCst);

        let result = if models > 0 {
            SolveResult::Sat
        } else if data.control.has(flags::INTERRUPT) {
            SolveResult::Interrupted
        } else if data.exhausted.has(EXHAUSTED) {
            SolveResult::Exhausted
        } else if data.control.has(flags::COMPLETE) {
            SolveResult::Unsat
        } else {
            SolveResult::Exhausted
        };

        info!(
            "result: {:?}, {} model(s), winner {}",
            result,
            models,
            if winner == usize::max_value() {
                "none".to_string()
            } else {
                winner.to_string()
            }
        );

        Ok(result)
    }
}

impl Drop for ParallelSolver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Iterator over the models of a running solve.
pub struct ModelIter<'a> {
    solver: &'a mut ParallelSolver,
    data: Arc<SharedData>,
}

impl<'a> ModelIter<'a> {
    /// Wait for the next model.
    ///
    /// Returns `None` once enumeration is exhausted or terminated.
    pub fn next(&mut self) -> Option<Model> {
        self.data.enumerator.next_model()
    }
}

impl<'a> Drop for ModelIter<'a> {
    fn drop(&mut self) {
        self.data.enumerator.close();
        self.data.terminate(false, false);
        self.solver.join_workers();
        *self.solver.current.lock() = None;
    }
}

/// Thread body of one worker.
fn worker_main(
    shared: Arc<SharedContext>,
    data: Arc<SharedData>,
    config: SolverConfig,
    id: WorkerId,
) -> SolverStats {
    let active_path: Arc<Mutex<Option<Vec<Lit>>>> = Arc::new(Mutex::new(None));

    let run = {
        let shared = Arc::clone(&shared);
        let data = Arc::clone(&data);
        let active_path = Arc::clone(&active_path);
        catch_unwind(AssertUnwindSafe(move || {
            worker_run(shared, data, config, id, active_path)
        }))
    };

    match run {
        Ok(stats) => stats,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());

            let error = if message.contains("allocation") || message.contains("memory") {
                CoreError::OutOfMemory(message)
            } else {
                CoreError::Runtime(message)
            };
            data.record_error(id, error);

            // A failing master, or a failure while everyone else is blocked, kills the run.
            // Otherwise the worker's sub-problem is handed back and the pool shrinks by one.
            if id == 0 || data.work_sem.active() {
                data.terminate(false, true);
            } else if data.control.has(flags::ALLOW_SPLIT) {
                if let Some(path) = active_path.lock().take() {
                    data.push_work(path);
                }
                warn!("worker {} failed and was removed from the pool", id);
            }

            data.worker_exit();
            SolverStats::default()
        }
    }
}

/// The work loop of one worker: request a guiding path, solve it, commit results.
fn worker_run(
    shared: Arc<SharedContext>,
    data: Arc<SharedData>,
    config: SolverConfig,
    id: WorkerId,
    active_path: Arc<Mutex<Option<Vec<Lit>>>>,
) -> SolverStats {
    let grace = config.integration.grace;
    let batch = config.integration.batch;

    let mut solver = Solver::new(shared, id, config);
    solver.add_post(Box::new(ParallelHandler::new(
        Arc::clone(&data),
        id,
        grace,
        batch,
    )));

    // A path retained over a synchronized restart.
    let mut retained: Option<(Arc<Vec<Lit>>, bool)> = None;

    'work: loop {
        // Need-work state: take the retained path, consume the initial path, pop from the split
        // queue or wait for someone to split.
        let (path, disjoint) = loop {
            if data.control.has(flags::TERMINATE) {
                break 'work;
            }
            if data.control.has(flags::SYNC) {
                let mut core = solver.core();
                handler::wait_on_sync(&data, id, &mut core);
                continue;
            }
            if let Some(got) = retained.take() {
                break got;
            }
            if let Some(got) = data.request_work(id) {
                break got;
            }

            if data.control.has(flags::ALLOW_SPLIT) {
                data.post_split_request();
                if !data.work_sem.down()
                    && !data.control.has(flags::SYNC)
                    && !data.control.has(flags::TERMINATE)
                {
                    // Everyone else is blocked and no work is left: the space is exhausted.
                    data.set_winner(id);
                    data.terminate(true, false);
                }
            } else {
                // Portfolio mode has exactly one round of work.
                data.set_winner(id);
                data.terminate(true, false);
            }
        };

        *active_path.lock() = Some(path.to_vec());
        solver.assume_path(&path, disjoint);
        solver.set_path_budget(data.max_conflicts());

        'solve: loop {
            match solver.search() {
                SearchOutcome::Sat => {
                    if commit_model(&mut solver, &data, id) {
                        continue 'solve;
                    }
                    break 'work;
                }
                SearchOutcome::Unsat => {
                    // Top-level conflict: the whole problem is unsatisfiable.
                    data.set_winner(id);
                    data.terminate(true, false);
                    break 'work;
                }
                SearchOutcome::PathUnsat => {
                    // Unsat commits are local; the sub-problem is exhausted, seek new work.
                    debug!("worker {}: path exhausted", id);
                    *active_path.lock() = None;
                    break 'solve;
                }
                SearchOutcome::Budget => {
                    data.exhausted.set(EXHAUSTED);
                    data.set_winner(id);
                    data.terminate(false, false);
                    break 'work;
                }
                SearchOutcome::Stopped => {
                    if data.control.has(flags::TERMINATE) {
                        break 'work;
                    }
                    if solver.sat_state() == SatState::Unsat {
                        data.set_winner(id);
                        data.terminate(true, false);
                        break 'work;
                    }
                    // A synchronized restart completed: keep the guiding path and re-establish
                    // it with the new global conflict budget.
                    retained = Some((path, disjoint));
                    break 'solve;
                }
            }
        }
    }

    *active_path.lock() = None;
    data.worker_exit();

    solver.stats().clone()
}

/// Commit a candidate model.
///
/// Returns whether the worker should continue searching for more models on its current path.
fn commit_model(solver: &mut Solver, data: &Arc<SharedData>, id: WorkerId) -> bool {
    let guard = data.model_mutex.lock();

    // Other workers may have committed models meanwhile; integrate their blocking clauses and
    // re-check that this is still a model.
    {
        let mut core = solver.core();
        let mut handler = ParallelHandler::new(Arc::clone(data), id, 0, 0);
        if !handler.is_model(&mut core) {
            drop(guard);
            if core.ctx.solver_state.sat_state == SatState::Unsat {
                return false;
            }
            core.ctx.solver_state.sat_state = SatState::Unknown;
            core.ctx.solver_state.clear_stop();
            return true;
        }
    }

    if data.control.has(flags::TERMINATE) {
        return false;
    }

    let model = match solver.model() {
        Some(model) => model,
        None => return true,
    };

    // The blocking basis is the guiding path plus all decisions beyond it.
    let mut decisions = solver.path().to_vec();
    decisions.extend(solver.decisions());

    solver.core().stats_mut().models += 1;

    let commit = data.enumerator.commit_model(&decisions, model);
    debug!(
        "worker {}: model {} committed",
        id,
        data.enumerator.model_count()
    );

    if commit.first && commit.more && !data.enumerator.supports_restarts() {
        // Switch from portfolio to backtrack-based splitting.
        data.control.set(flags::FORBID_RESTART | flags::ALLOW_SPLIT);
        solver.mark_disjoint(true);
    }

    if !commit.more {
        data.set_winner(id);
        data.terminate(data.enumerator.complete(), false);
        return false;
    }

    // Keep searching: the own blocking clause arrives through the next model integration and
    // moves the search away from this model.
    solver.core().ctx.solver_state.sat_state = SatState::Unknown;
    true
}
