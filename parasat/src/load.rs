//! Attaching the frozen problem and integrating distributed clauses.
use partial_ref::{partial, PartialRef};

use parasat_formula::Lit;

use crate::clause::SharedLits;
use crate::cons::ClauseConstraint;
use crate::context::{parts::*, set_var_count, Context};
use crate::prop::{backtrack, enqueue_assignment, ConsWatch, Reason};
use crate::shared::SharedContext;
use crate::state::SatState;
use crate::vars::VarFlags;

/// Load the frozen problem into a worker.
///
/// Long problem clauses are attached as shared views over the context's literal arrays, facts are
/// enqueued at level 0 and eliminated variables are excluded from the assignment. Binary and
/// ternary clauses need no per-worker state, they are propagated straight from the shared
/// short-implication graph.
pub fn attach_problem(
    mut ctx: partial!(
        Context,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut ImplGraphP,
        mut SharedClausesP,
        mut SolverStateP,
        mut TmpDataP,
        mut TrailP,
        mut VsidsP,
        mut WatchlistsP,
    ),
    shared: &SharedContext,
) {
    set_var_count(ctx.borrow(), shared.var_count());

    for index in 0..shared.var_count() {
        let var = parasat_formula::Var::from_index(index);
        if shared.vars().info(var).flags.contains(VarFlags::ELIMINATED) {
            ctx.part_mut(AssignmentP).eliminate(var);
        }
    }

    for slits in shared.clauses() {
        let lits = slits.lits();
        let head = [lits[0], lits[1], lits[2]];
        ctx.part_mut(SharedClausesP).add(slits.clone(), head);
    }

    if shared.is_unsat() {
        ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
        return;
    }

    for &lit in shared.facts() {
        let assignment = ctx.part(AssignmentP);
        if assignment.lit_is_false(lit) {
            ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
            return;
        } else if assignment.lit_is_unk(lit) {
            enqueue_assignment(ctx.borrow(), lit, Reason::Unit);
        }
    }
}

/// Where an integrated clause comes from.
///
/// Lemmas are implied by the problem and may enter the shared short-implication graph, which
/// outlives the run. Enumerator clauses (model blocking) are scoped to one run and must stay in
/// per-worker storage: the virtual constraint layer for short clauses, a shared view otherwise.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum IntegrateSource {
    Lemma,
    Enumerator,
}

/// Outcome of integrating a distributed clause.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Integration {
    /// The clause is attached (as shared view or short-implication edges).
    Kept,
    /// The clause was unit and propagated an assignment, possibly after a backjump.
    Asserting,
    /// The clause is already satisfied at level 0 and was dropped.
    Subsumed,
    /// The clause is empty under level-0 assignments, the problem is unsatisfiable.
    Unsat,
}

/// Integrate a clause received from another worker or the enumerator.
///
/// Root-false literals are ignored for watching. Short remainders go into the shared
/// short-implication graph, long ones are attached as a shared view. A clause that is falsified
/// under the current assignment first backjumps below its highest literal level, so integration
/// never raises a conflict; if it becomes unit it propagates with the new view as antecedent.
pub fn integrate_clause(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ConstraintsP,
        mut ImplGraphP,
        mut SharedClausesP,
        mut SolverStateP,
        mut StatsP,
        mut TrailP,
        mut VsidsP,
        mut WatchlistsP,
    ),
    shared: &SharedContext,
    slits: SharedLits,
    source: IntegrateSource,
) -> Integration {
    let lits = slits.lits();

    {
        let assignment = ctx.part(AssignmentP);
        let graph = ctx.part(ImplGraphP);

        if lits
            .iter()
            .any(|&lit| assignment.lit_is_true(lit) && graph.level(lit.var()) == 0)
        {
            return Integration::Subsumed;
        }
    }

    // Literals false at level 0 are dead, they never need to be watched.
    let live: Vec<Lit> = {
        let assignment = ctx.part(AssignmentP);
        let graph = ctx.part(ImplGraphP);
        lits.iter()
            .cloned()
            .filter(|&lit| !(assignment.lit_is_false(lit) && graph.level(lit.var()) == 0))
            .collect()
    };

    ctx.part_mut(StatsP).integrated += 1;

    if live.is_empty() {
        ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
        return Integration::Unsat;
    }

    // A falsified clause backjumps below its second-highest literal level first. Afterwards it is
    // unit or has at least one unassigned literal.
    if {
        let assignment = ctx.part(AssignmentP);
        live.iter().all(|&lit| assignment.lit_is_false(lit))
    } {
        let target = {
            let graph = ctx.part(ImplGraphP);
            let max = live.iter().map(|&lit| graph.level(lit.var())).max().unwrap();
            live.iter()
                .map(|&lit| graph.level(lit.var()))
                .filter(|&level| level < max)
                .max()
                .unwrap_or(0)
        };
        backtrack(ctx.borrow(), target);
    }

    match live.len() {
        1 => {
            // A distributed unit clause becomes a fact.
            let lit = live[0];
            backtrack(ctx.borrow(), 0);
            let assignment = ctx.part(AssignmentP);
            if assignment.lit_is_true(lit) {
                Integration::Subsumed
            } else if assignment.lit_is_false(lit) {
                ctx.part_mut(SolverStateP).sat_state = SatState::Unsat;
                Integration::Unsat
            } else {
                enqueue_assignment(ctx.borrow(), lit, Reason::Unit);
                ctx.part_mut(StatsP).integrated_asserting += 1;
                Integration::Asserting
            }
        }
        2 | 3 => match source {
            IntegrateSource::Lemma => {
                shared.sig().add_learnt(&live);
                integrate_short(ctx.borrow(), &live)
            }
            IntegrateSource::Enumerator => integrate_constraint(ctx.borrow(), &live),
        },
        _ => integrate_long(ctx.borrow(), slits, live),
    }
}

/// Attach a run-scoped short clause through the virtual constraint layer.
fn integrate_constraint(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ConstraintsP,
        mut ImplGraphP,
        mut StatsP,
        mut TrailP,
        mut WatchlistsP,
    ),
    live: &[Lit],
) -> Integration {
    let cref = ctx
        .part_mut(ConstraintsP)
        .add(Box::new(ClauseConstraint::new(live)));

    for &lit in live.iter() {
        ctx.part_mut(WatchlistsP)
            .add_cons_watch(!lit, ConsWatch { cons: cref, data: 0 });
    }

    let other: Vec<Lit> = {
        let assignment = ctx.part(AssignmentP);
        live.iter()
            .cloned()
            .filter(|&lit| !assignment.lit_is_false(lit))
            .collect()
    };

    match other[..] {
        [lit] => {
            if ctx.part(AssignmentP).lit_is_unk(lit) {
                enqueue_assignment(ctx.borrow(), lit, Reason::External(cref, 0));
                ctx.part_mut(StatsP).integrated_asserting += 1;
                Integration::Asserting
            } else {
                Integration::Kept
            }
        }
        _ => Integration::Kept,
    }
}

/// Evaluate a freshly added short-implication clause under the current assignment.
fn integrate_short(
    mut ctx: partial!(Context, mut AssignmentP, mut ImplGraphP, mut StatsP, mut TrailP),
    live: &[Lit],
) -> Integration {
    let (false_lits, other): (Vec<Lit>, Vec<Lit>) = {
        let assignment = ctx.part(AssignmentP);
        live.iter()
            .cloned()
            .partition(|&lit| assignment.lit_is_false(lit))
    };

    match other[..] {
        [lit] => {
            if ctx.part(AssignmentP).lit_is_unk(lit) {
                let reason = match false_lits[..] {
                    [a] => Reason::Binary([a]),
                    [a, b] => Reason::Ternary([a, b]),
                    _ => unreachable!(),
                };
                enqueue_assignment(ctx.borrow(), lit, reason);
                ctx.part_mut(StatsP).integrated_asserting += 1;
                Integration::Asserting
            } else {
                Integration::Kept
            }
        }
        _ => Integration::Kept,
    }
}

/// Attach a long distributed clause as a shared view.
fn integrate_long(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ImplGraphP,
        mut SharedClausesP,
        mut StatsP,
        mut TrailP,
        mut WatchlistsP,
    ),
    slits: SharedLits,
    live: Vec<Lit>,
) -> Integration {
    // Order watch candidates: non-false literals first, false ones by decreasing level.
    let mut ordered = live;
    {
        let assignment = ctx.part(AssignmentP);
        let graph = ctx.part(ImplGraphP);
        ordered.sort_by_key(|&lit| {
            if assignment.lit_is_false(lit) {
                usize::max_value() - graph.level(lit.var())
            } else {
                0
            }
        });
    }

    let head = [ordered[0], ordered[1], ordered[2]];
    let non_false = {
        let assignment = ctx.part(AssignmentP);
        ordered
            .iter()
            .take_while(|&&lit| !assignment.lit_is_false(lit))
            .count()
    };
    debug_assert!(non_false >= 1);

    let sref = ctx.part_mut(SharedClausesP).add(slits, head);
    ctx.part_mut(WatchlistsP)
        .watch_shared_clause(sref, [head[0], head[1]]);

    if non_false == 1 && ctx.part(AssignmentP).lit_is_unk(head[0]) {
        enqueue_assignment(ctx.borrow(), head[0], Reason::Shared(sref));
        ctx.part_mut(StatsP).integrated_asserting += 1;
        Integration::Asserting
    } else {
        Integration::Kept
    }
}
