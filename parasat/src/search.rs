//! Conflict driven clause learning.
use log::info;

use partial_ref::{partial, IntoPartialRefMut, PartialRef};

use parasat_formula::Lit;

use crate::analyze::analyze_conflict;
use crate::clause::{
    bump_clause_activity, db, decay_clause_activities, gc::collect_garbage,
    header::ClauseHeader, reduce::reduce_learnts, ClauseKind, SharedLits,
};
use crate::context::{parts::*, Context};
use crate::decision::make_decision;
use crate::dist::WorkerId;
use crate::glue::compute_glue;
use crate::path::{enqueue_path_lit, EnqueuePath};
use crate::post::PostChain;
use crate::prop::{backtrack, propagate, restart, Conflict, Reason};
use crate::restart::RestartCheck;
use crate::shared::SharedContext;
use crate::simplify::{prove_units, simplify};
use crate::solver::SolverCore;
use crate::state::SatState;

/// Result of a search run.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SearchOutcome {
    /// A candidate model was found, all variables are assigned.
    Sat,
    /// The problem is unsatisfiable.
    Unsat,
    /// The current guiding path is exhausted.
    PathUnsat,
    /// The overall conflict budget is used up.
    Budget,
    /// A stop conflict unwound the search.
    Stopped,
}

/// Result of a single conflict step.
enum StepResult {
    Continue,
    Done(SearchOutcome),
}

/// Specifies how [`find_conflict`] ended without a satisfying assignment.
enum FoundConflict {
    Conflict(Conflict),
    Path,
    Stop,
}

/// Run the CDCL loop until a result or a budget boundary is reached.
pub fn search(
    ctx: &mut Context,
    shared: &SharedContext,
    chain: &mut PostChain,
    id: WorkerId,
) -> SearchOutcome {
    loop {
        let mut do_restart = false;

        {
            let mut ctx = (*ctx).into_partial_ref_mut();

            match ctx.part(SolverStateP).sat_state {
                SatState::Unsat => return SearchOutcome::Unsat,
                SatState::UnsatUnderPath => return SearchOutcome::PathUnsat,
                _ => (),
            }

            if ctx.part(ScheduleP).budget_exhausted() {
                return SearchOutcome::Budget;
            }

            let trail_len = ctx.part(TrailP).trail().len();
            match ctx.part_mut(ScheduleP).check_restart(trail_len) {
                RestartCheck::Restart => do_restart = true,
                RestartCheck::Blocked => ctx.part_mut(StatsP).blocked_restarts += 1,
                RestartCheck::None => (),
            }

            let learnt_count = ctx.part(ClauseDbP).learnt_count() as u64;
            let learnt_words = ctx.part(ClauseAllocP).buffer_size() as u64;
            if ctx.part_mut(ScheduleP).check_reduce(learnt_count, learnt_words) {
                reduce_learnts(ctx.borrow());
                collect_garbage(ctx.borrow());
                ctx.part_mut(ScheduleP).on_reduce();
            }

            if do_restart {
                restart(ctx.borrow());
                ctx.part_mut(StatsP).restarts += 1;
                ctx.part_mut(ScheduleP).on_restart();

                let stats = ctx.part(StatsP);
                if stats.restarts % 100 == 0 {
                    info!(
                        "worker {}: confl: {}k rest: {} learnt: {}",
                        id,
                        stats.conflicts / 1000,
                        stats.restarts,
                        stats.learnt_clauses,
                    );
                }
            }
        }

        if do_restart {
            chain.reset_all();
        }

        match conflict_step(ctx, shared, chain, id) {
            StepResult::Continue => (),
            StepResult::Done(outcome) => return outcome,
        }
    }
}

/// Find a conflict, learn a clause and backtrack.
fn conflict_step(
    ctx: &mut Context,
    shared: &SharedContext,
    chain: &mut PostChain,
    id: WorkerId,
) -> StepResult {
    let conflict = match find_conflict(ctx, shared, chain) {
        Ok(()) => {
            // All variables are assigned, ask the final-check hooks.
            for post in chain.iter_mut() {
                let mut core = SolverCore {
                    ctx: &mut *ctx,
                    shared,
                };
                if !post.is_model(&mut core) {
                    if ctx.solver_state.stopped {
                        return StepResult::Done(handle_stop(ctx));
                    }
                    // The hook enqueued an assignment or raised a conflict, keep searching.
                    return StepResult::Continue;
                }
            }
            ctx.solver_state.sat_state = SatState::Sat;
            return StepResult::Done(SearchOutcome::Sat);
        }
        Err(FoundConflict::Path) => {
            ctx.solver_state.sat_state = SatState::UnsatUnderPath;
            return StepResult::Done(SearchOutcome::PathUnsat);
        }
        Err(FoundConflict::Stop) => {
            return StepResult::Done(handle_stop(ctx));
        }
        Err(FoundConflict::Conflict(conflict)) => conflict,
    };

    let mut learnt_is_unsat = false;

    {
        let mut ctx = (*ctx).into_partial_ref_mut();

        ctx.part_mut(StatsP).conflicts += 1;
        ctx.part_mut(StatsP).analyzed += 1;

        let trail_len = ctx.part(TrailP).trail().len();

        let backtrack_to = analyze_conflict(ctx.borrow(), shared.sig(), conflict);

        update_involved_glue(ctx.borrow());

        let (analyze, mut ctx) = ctx.split_part(AnalyzeConflictP);

        for &cref in analyze.involved() {
            bump_clause_activity(ctx.borrow(), cref);
        }

        decay_clause_activities(ctx.borrow());

        let clause = analyze.clause();

        // The clause is still in conflict, so the computed glue is one higher than it'll be once
        // the clause becomes asserting after backtracking.
        let glue = if clause.len() > 1 {
            (compute_glue(ctx.borrow(), clause) - 1) as u32
        } else {
            0
        };

        ctx.part_mut(ScheduleP).new_conflict(glue, trail_len);

        backtrack(ctx.borrow(), backtrack_to);

        let reason = match clause.len() {
            0 => {
                ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
                learnt_is_unsat = true;
                Reason::Unit
            }
            1 => {
                publish_lemma(ctx.borrow(), shared, id, clause, 0);
                Reason::Unit
            }
            2 => {
                shared.sig().add_learnt(clause);
                Reason::Binary([clause[1]])
            }
            3 => {
                shared.sig().add_learnt(clause);
                Reason::Ternary([clause[1], clause[2]])
            }
            _ => {
                let mut header = ClauseHeader::new(ClauseKind::Conflict);
                header.set_glue(glue);
                let cref = db::add_clause(ctx.borrow(), header, clause);
                ctx.part_mut(StatsP).learnt_clauses += 1;

                publish_lemma(ctx.borrow(), shared, id, clause, glue);

                Reason::Long(cref)
            }
        };

        if !learnt_is_unsat {
            crate::prop::enqueue_assignment(ctx.borrow(), clause[0], reason);
        }
    }

    chain.reset_all();
    chain.undo_all();

    if learnt_is_unsat {
        StepResult::Done(SearchOutcome::Unsat)
    } else {
        StepResult::Continue
    }
}

/// Unwind the trail after a stop conflict.
fn handle_stop(ctx: &mut Context) -> SearchOutcome {
    let mut ctx = (*ctx).into_partial_ref_mut();

    let level = ctx
        .part(PathP)
        .path_levels()
        .min(ctx.part(TrailP).current_level());
    backtrack(ctx.borrow(), level);
    ctx.part_mut(TrailP).abort_queue();

    SearchOutcome::Stopped
}

/// Find a conflict.
///
/// Returns `Err` if a conflict was found and `Ok` if a satisfying assignment was found instead.
/// Runs unit propagation and the post-propagator chain to a joint fixpoint, establishes the
/// guiding path and makes decisions.
fn find_conflict(
    ctx: &mut Context,
    shared: &SharedContext,
    chain: &mut PostChain,
) -> Result<(), FoundConflict> {
    loop {
        let (propagation_result, new_units) = {
            let mut ctx = (*ctx).into_partial_ref_mut();
            let result = propagate(ctx.borrow(), shared);
            let new_units = prove_units(ctx.borrow());
            (result, new_units)
        };

        if let Err(conflict) = propagation_result {
            if conflict.is_stop() {
                return Err(FoundConflict::Stop);
            }
            return Err(FoundConflict::Conflict(conflict));
        }

        if new_units {
            let mut ctx = (*ctx).into_partial_ref_mut();
            simplify(ctx.borrow(), shared);
        }

        // Run the post-propagator chain. A propagator that enqueues assignments sends us back to
        // unit propagation, afterwards the chain is re-run from the front.
        let mut made_progress = false;

        for post in chain.iter_mut() {
            let trail_before = ctx.trail.trail().len();

            let mut core = SolverCore {
                ctx: &mut *ctx,
                shared,
            };
            if !post.propagate_fixpoint(&mut core, false) {
                if ctx.solver_state.stopped {
                    return Err(FoundConflict::Stop);
                }
                return Err(FoundConflict::Conflict(Conflict::External));
            }

            if ctx.trail.trail().len() != trail_before || !ctx.trail.fully_propagated() {
                made_progress = true;
                break;
            }
        }

        if made_progress {
            continue;
        }

        {
            let mut ctx = (*ctx).into_partial_ref_mut();
            match enqueue_path_lit(ctx.borrow()) {
                EnqueuePath::Enqueued => continue,
                EnqueuePath::Conflict => return Err(FoundConflict::Path),
                EnqueuePath::Done => (),
            }
        }

        let decided = {
            let mut ctx = (*ctx).into_partial_ref_mut();
            make_decision(ctx.borrow())
        };

        if !decided {
            return Ok(());
        }
    }
}

/// Lower the stored glue of the clauses involved in the last conflict.
///
/// A clause re-derived during analysis keeps the smallest glue ever observed for it.
fn update_involved_glue(
    mut ctx: partial!(
        Context,
        mut ClauseAllocP,
        mut SharedClausesP,
        mut TmpDataP,
        AnalyzeConflictP,
        ImplGraphP,
    ),
) {
    let mut updates: Vec<(crate::clause::ClauseRef, u32)> = vec![];
    let mut shared_updates: Vec<(crate::clause::SharedClauseRef, u32)> = vec![];

    {
        let mut scan: partial!(
            Context,
            mut ClauseAllocP,
            mut SharedClausesP,
            mut TmpDataP,
            AnalyzeConflictP,
            ImplGraphP,
        ) = ctx.borrow();
        let (analyze, mut scan) = scan.split_part(AnalyzeConflictP);
        let (alloc, mut scan) = scan.split_part(ClauseAllocP);
        let (shared_db, mut scan) = scan.split_part(SharedClausesP);

        for &cref in analyze.involved() {
            let lits = alloc.clause(cref).lits();
            let glue = compute_glue(scan.borrow(), lits) as u32;
            if glue < alloc.header(cref).glue() {
                updates.push((cref, glue));
            }
        }

        for &sref in analyze.involved_shared() {
            let slot = shared_db.slot(sref);
            let glue = compute_glue(scan.borrow(), slot.lits.lits()) as u32;
            if glue < slot.glue {
                shared_updates.push((sref, glue));
            }
        }
    }

    for (cref, glue) in updates {
        ctx.part_mut(ClauseAllocP).header_mut(cref).update_glue(glue);
    }
    for (sref, glue) in shared_updates {
        ctx.part_mut(SharedClausesP).slot_mut(sref).glue = glue;
    }
}

/// Offer a freshly learnt clause to the other workers.
fn publish_lemma(
    mut ctx: partial!(Context, mut StatsP),
    shared: &SharedContext,
    id: WorkerId,
    clause: &[Lit],
    glue: u32,
) {
    if let Some(dist) = shared.distributor() {
        if dist.is_candidate(clause.len(), glue, ClauseKind::Conflict) {
            dist.publish(id, SharedLits::new(clause, ClauseKind::Conflict, glue));
            ctx.part_mut(StatsP).published += 1;
        }
    }
}
