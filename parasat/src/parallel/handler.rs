//! The per-worker message handler.
//!
//! A [`ParallelHandler`] sits between a worker and the coordinator. It is registered as a
//! post-propagator on the worker, so messages are checked at every propagation fixpoint: the
//! terminate flag raises a stop conflict, a sync flag sends the worker into the barrier, a split
//! request carves a guiding path off this worker's search space. It also drives lemma exchange,
//! receiving a bounded batch from the distributor and integrating pending enumerator blocking
//! clauses.
use std::sync::Arc;

use log::{debug, trace};

use partial_ref::{IntoPartialRefMut, PartialRef};

use crate::clause::SharedLits;
use crate::dist::WorkerId;
use crate::load::{integrate_clause, IntegrateSource, Integration};
use crate::post::{PostPriority, PostPropagator};
use crate::solver::SolverCore;
use crate::state::SatState;

use super::control::{flags, sync_outcome, SharedData};

/// Message and integration handler of one worker.
pub struct ParallelHandler {
    data: Arc<SharedData>,
    id: WorkerId,
    /// Receive buffer for distributed lemmas.
    received: Vec<SharedLits>,
    /// Ring of integrated clause views kept alive unconditionally.
    grace: usize,
    batch: usize,
}

impl ParallelHandler {
    pub fn new(data: Arc<SharedData>, id: WorkerId, grace: usize, batch: usize) -> ParallelHandler {
        ParallelHandler {
            data,
            id,
            received: vec![],
            grace,
            batch,
        }
    }

    /// Integrate blocking clauses the enumerator added since our last update.
    fn integrate_models(&mut self, core: &mut SolverCore<'_>) -> bool {
        let seen = core.ctx.solver_state.blocking_seen;
        let (pending, new_seen) = self.data.enumerator.blocking_since(seen);
        if pending.is_empty() {
            return true;
        }
        core.ctx.solver_state.blocking_seen = new_seen;

        for slits in pending {
            let shared = core.shared;
            let mut ctx = (*core.ctx).into_partial_ref_mut();
            let outcome =
                integrate_clause(ctx.borrow(), shared, slits, IntegrateSource::Enumerator);
            if outcome == Integration::Unsat {
                return false;
            }
        }
        true
    }

    /// Receive a bounded batch of lemmas from the distributor.
    fn integrate_lemmas(&mut self, core: &mut SolverCore<'_>) -> bool {
        let dist = match core.shared.distributor() {
            Some(dist) => Arc::clone(dist),
            None => return true,
        };

        self.received.clear();
        dist.receive(self.id, &mut self.received, self.batch);

        for slits in self.received.drain(..) {
            // Clauses already satisfied at the root are filtered inside the integration.
            let shared = core.shared;
            let mut ctx = (*core.ctx).into_partial_ref_mut();
            let outcome = integrate_clause(ctx.borrow(), shared, slits, IntegrateSource::Lemma);
            if outcome == Integration::Unsat {
                return false;
            }
        }

        // The grace ring bounds how many integrated views survive; reduction handles the rest,
        // so all we track here is the count for the log.
        if core.ctx.shared_clauses.count() > self.grace {
            trace!(
                "worker {}: {} integrated views alive",
                self.id,
                core.ctx.shared_clauses.count()
            );
        }

        true
    }

    /// Hand a split-off guiding path to the coordinator if one was requested.
    fn handle_split(&mut self, core: &mut SolverCore<'_>) {
        if !core.ctx.path.is_disjoint() || !self.data.split_requested() {
            return;
        }

        let new_path = {
            let mut ctx = (*core.ctx).into_partial_ref_mut();
            crate::path::split_path(ctx.borrow())
        };

        if let Some(path) = new_path {
            // Declare the request handled before publishing the path to limit over-splitting.
            self.data.about_to_split();
            debug!("worker {}: split {:?}", self.id, path);
            self.data.push_work(path);
        }
    }
}

impl PostPropagator for ParallelHandler {
    fn priority(&self) -> PostPriority {
        PostPriority::General
    }

    fn propagate_fixpoint(&mut self, core: &mut SolverCore<'_>, recursive: bool) -> bool {
        if self.data.control.has(flags::TERMINATE) {
            core.set_stop_conflict();
            return false;
        }

        if self.data.control.has(flags::SYNC) {
            if wait_on_sync(&self.data, self.id, core) {
                core.set_stop_conflict();
                return false;
            }
            return true;
        }

        // Skip the expensive updates when re-entered from another propagator.
        if recursive {
            return true;
        }

        if self.data.control.has(flags::SPLIT) {
            self.handle_split(core);
        }

        if core.ctx.schedule.path_budget_exhausted() {
            self.data.request_restart();
            // Pace the next request; the sync barrier rearms the budget when it fires.
            let conflicts = core.ctx.schedule.conflicts;
            core.ctx.schedule.path_budget =
                conflicts.saturating_add(self.data.max_conflicts().max(1024));
        }

        if !self.integrate_models(core) || !self.integrate_lemmas(core) {
            core.set_stop_conflict();
            return false;
        }

        true
    }

    fn is_model(&mut self, core: &mut SolverCore<'_>) -> bool {
        // A candidate model only counts once all distributed information is integrated and it
        // survived the update.
        if !self.integrate_models(core) || !self.integrate_lemmas(core) {
            core.set_stop_conflict();
            return false;
        }
        core.ctx.solver_state.sat_state != SatState::Unsat
            && core.all_assigned()
            && core.queue_empty()
    }

    fn is_idempotent(&self) -> bool {
        true
    }
}

/// Establish the sync barrier protocol for a worker.
///
/// Blocks until all workers arrived; the last one performs the shared-state update as the
/// leader. Returns `true` when the worker should unwind to its path root via a stop conflict,
/// either because a restart cycle completed or because termination was posted meanwhile.
pub(super) fn wait_on_sync(data: &SharedData, id: WorkerId, core: &mut SolverCore<'_>) -> bool {
    trace!("worker {}: entering sync barrier", id);

    if data.work_sem.wait() {
        // Last worker to arrive: perform the shared-state update and release the others.
        debug!("worker {}: sync leader", id);
        data.leader_update();
    }

    if data.control.has(flags::TERMINATE) {
        return true;
    }

    match data.sync_result.load(std::sync::atomic::Ordering::SeqCst) {
        sync_outcome::RESTART => true,
        _ => {
            // The restart was abandoned, keep searching on the current path.
            core.ctx.schedule.abandon_restart();
            false
        }
    }
}
