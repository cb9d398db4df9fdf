//! A single CDCL worker.
use std::sync::Arc;

use log::debug;

use partial_ref::{IntoPartialRefMut, PartialRef};

use parasat_formula::{Lit, Var};

use crate::config::SolverConfig;
use crate::context::{config_changed, parts::*, Context};
use crate::dist::WorkerId;
use crate::load::{attach_problem, integrate_clause, IntegrateSource, Integration};
use crate::path::split_path;
use crate::post::{PostChain, PostPropagator};
use crate::prop::{backtrack, Reason};
use crate::search::{search, SearchOutcome};
use crate::shared::SharedContext;
use crate::state::SatState;
use crate::stats::SolverStats;

/// Restricted solver access for post-propagators and constraints.
///
/// Wraps a worker's state for the duration of one callback. External propagators use the public
/// surface: value and level queries, enqueuing assignments and raising conflicts.
pub struct SolverCore<'a> {
    pub(crate) ctx: &'a mut Context,
    pub(crate) shared: &'a SharedContext,
}

impl<'a> SolverCore<'a> {
    pub fn shared(&self) -> &SharedContext {
        self.shared
    }

    pub fn lit_value(&self, lit: Lit) -> Option<bool> {
        self.ctx.assignment.lit_value(lit)
    }

    pub fn lit_is_true(&self, lit: Lit) -> bool {
        self.ctx.assignment.lit_is_true(lit)
    }

    pub fn lit_is_false(&self, lit: Lit) -> bool {
        self.ctx.assignment.lit_is_false(lit)
    }

    pub fn level(&self, var: Var) -> usize {
        self.ctx.impl_graph.level(var)
    }

    pub fn current_level(&self) -> usize {
        self.ctx.trail.current_level()
    }

    /// Number of decision levels taken by the guiding path.
    pub fn root_level(&self) -> usize {
        self.ctx.path.path_levels()
    }

    /// Assigned literals in assignment order.
    pub fn trail(&self) -> &[Lit] {
        self.ctx.trail.trail()
    }

    /// Whether all unpropagated assignments are processed.
    pub fn queue_empty(&self) -> bool {
        self.ctx.trail.fully_propagated()
    }

    /// Whether every non-eliminated variable is assigned.
    pub fn all_assigned(&self) -> bool {
        self.ctx
            .assignment
            .assignment()
            .iter()
            .enumerate()
            .all(|(index, value)| {
                value.is_some() || self.ctx.assignment.is_eliminated(Var::from_index(index))
            })
    }

    /// Enqueue an assignment.
    ///
    /// When the literal is already assigned no assignment is made and the result states whether
    /// the existing assignment agrees.
    pub fn enqueue(&mut self, lit: Lit, reason: Reason) -> bool {
        let mut ctx = (*self.ctx).into_partial_ref_mut();
        match ctx.part(AssignmentP).lit_value(lit) {
            Some(value) => value,
            None => {
                crate::prop::enqueue_assignment(ctx.borrow(), lit, reason);
                true
            }
        }
    }

    /// Record a conflict clause of falsified literals.
    pub fn raise_conflict(&mut self, lits: &[Lit]) {
        debug_assert!(lits.iter().all(|&lit| self.lit_is_false(lit)));
        let conflict = &mut self.ctx.solver_state.external_conflict;
        conflict.clear();
        conflict.extend_from_slice(lits);
    }

    /// Raise a stop conflict, unwinding the search.
    pub(crate) fn set_stop_conflict(&mut self) {
        self.ctx.solver_state.stopped = true;
        self.ctx.trail.abort_queue();
    }

    pub(crate) fn stats_mut(&mut self) -> &mut SolverStats {
        &mut self.ctx.stats
    }
}

/// A CDCL worker attached to a shared problem.
pub struct Solver {
    ctx: Box<Context>,
    post: PostChain,
    shared: Arc<SharedContext>,
    id: WorkerId,
}

impl Solver {
    /// Create a worker and attach it to a frozen shared context.
    pub fn new(shared: Arc<SharedContext>, id: WorkerId, config: SolverConfig) -> Solver {
        debug_assert!(shared.is_frozen());

        let mut ctx: Box<Context> = Default::default();
        ctx.solver_config = config;

        {
            let mut ctx = ctx.into_partial_ref_mut();
            config_changed(ctx.borrow());
        }

        let mut solver = Solver {
            ctx,
            post: PostChain::default(),
            shared,
            id,
        };

        {
            let shared = Arc::clone(&solver.shared);
            let mut ctx = solver.ctx.into_partial_ref_mut();
            attach_problem(ctx.borrow(), &shared);
        }

        debug!("worker {} attached", id);
        solver
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn shared(&self) -> &Arc<SharedContext> {
        &self.shared
    }

    pub fn stats(&self) -> &SolverStats {
        &self.ctx.stats
    }

    pub fn sat_state(&self) -> SatState {
        self.ctx.solver_state.sat_state
    }

    /// Register a post-propagator.
    pub fn add_post(&mut self, post: Box<dyn PostPropagator>) {
        self.post.add(post);
    }

    /// Restricted view for callbacks and the parallel handler.
    pub fn core(&mut self) -> SolverCore<'_> {
        SolverCore {
            ctx: &mut self.ctx,
            shared: &self.shared,
        }
    }

    /// Install a new guiding path.
    ///
    /// Undoes all decisions, re-enqueues the level-0 trail for propagation and resets a
    /// previously raised stop conflict.
    pub fn assume_path(&mut self, lits: &[Lit], disjoint: bool) {
        let mut ctx = self.ctx.into_partial_ref_mut();

        backtrack(ctx.borrow(), 0);
        ctx.part_mut(TrailP).reset_queue();
        ctx.part_mut(PathP).set(lits, disjoint);

        let state = ctx.part_mut(SolverStateP);
        state.clear_stop();
        if state.sat_state != SatState::Unsat {
            state.sat_state = SatState::Unknown;
        }
    }

    /// Whether this worker owns a region disjoint from all other workers.
    pub fn has_disjoint_path(&self) -> bool {
        self.ctx.path.is_disjoint()
    }

    pub fn mark_disjoint(&mut self, disjoint: bool) {
        self.ctx.path.set_disjoint(disjoint);
    }

    /// Whether an undone decision branch can be carved off.
    pub fn splittable(&self) -> bool {
        let path_levels = self.ctx.path.path_levels();
        self.ctx.trail.current_level() > path_levels
            && self.ctx.trail.decision(path_levels + 1).is_some()
    }

    /// Carve off the lowest undone decision branch as a new guiding path.
    pub fn split(&mut self) -> Option<Vec<Lit>> {
        let mut ctx = self.ctx.into_partial_ref_mut();
        split_path(ctx.borrow())
    }

    /// Conflict budget for the current guiding path, counted from now.
    pub fn set_path_budget(&mut self, budget: u64) {
        let schedule = &mut self.ctx.schedule;
        schedule.path_budget = schedule.conflicts.saturating_add(budget);
    }

    /// Run the CDCL loop until a result or budget boundary.
    pub fn search(&mut self) -> SearchOutcome {
        let id = self.id;
        let Solver {
            ctx, post, shared, ..
        } = self;
        search(&mut **ctx, shared, post, id)
    }

    /// Integrate a clause received from another worker or the enumerator.
    ///
    /// A falsified clause backjumps first, so integration never conflicts; it may leave new
    /// assignments in the propagation queue.
    pub fn integrate(
        &mut self,
        slits: crate::clause::SharedLits,
        source: IntegrateSource,
    ) -> Integration {
        let shared = Arc::clone(&self.shared);
        let mut ctx = self.ctx.into_partial_ref_mut();
        integrate_clause(ctx.borrow(), &shared, slits, source)
    }

    /// Set of literals that satisfy the formula.
    pub fn model(&self) -> Option<Vec<Lit>> {
        if self.ctx.solver_state.sat_state != SatState::Sat {
            return None;
        }
        Some(
            self.ctx
                .assignment
                .assignment()
                .iter()
                .enumerate()
                .flat_map(|(index, assignment)| {
                    assignment.map(|value| Lit::from_index(index, !value))
                })
                .collect(),
        )
    }

    /// Decision literals of the current assignment beyond the guiding path.
    pub fn decisions(&self) -> Vec<Lit> {
        let path_levels = self.ctx.path.path_levels();
        (path_levels + 1..=self.ctx.trail.current_level())
            .filter_map(|level| self.ctx.trail.decision(level))
            .collect()
    }

    /// The current guiding path.
    pub fn path(&self) -> &[Lit] {
        self.ctx.path.lits()
    }
}
