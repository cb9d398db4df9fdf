//! Unit propagation.
use partial_ref::{partial, PartialRef};

use parasat_formula::Lit;

use crate::cons::{PropContext, PropResult};
use crate::context::{parts::*, Context};
use crate::shared::SharedContext;
use crate::sig::propagate_short;

pub mod assignment;
pub mod graph;
pub mod long;
pub mod watch;

pub use assignment::{
    backtrack, enqueue_assignment, enqueue_raw, full_restart, restart, Assignment, Trail, ValueSet,
};
pub use graph::{Conflict, ImplGraph, ImplNode, Reason};
pub use long::propagate_long;
pub use watch::{ConsWatch, SharedWatch, Watch, Watchlists};

/// Propagate all enqueued assignments to a fixpoint.
///
/// For each literal taken off the queue the short-implication graph is consulted first, then the
/// watched long and shared clauses, and finally the virtual constraint watches.
pub fn propagate(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ConstraintsP,
        mut ImplGraphP,
        mut SharedClausesP,
        mut SolverStateP,
        mut StatsP,
        mut TrailP,
        mut WatchlistsP,
        ClauseDbP,
    ),
    shared: &SharedContext,
) -> Result<(), Conflict> {
    if !ctx.part(WatchlistsP).enabled() {
        watch::rebuild_watchlists(ctx.borrow());
    }

    while let Some(lit) = ctx.part_mut(TrailP).pop_queue() {
        ctx.part_mut(StatsP).propagations += 1;

        propagate_short(ctx.borrow(), shared.sig(), lit)?;
        propagate_long(ctx.borrow(), lit)?;
        propagate_constraints(ctx.borrow(), lit)?;
    }

    Ok(())
}

/// Invoke the virtual propagate of all constraints watching the given literal.
///
/// The constraint watch layer triggers when the watched literal becomes true; a clause-like
/// constraint therefore watches the negations of its literals.
fn propagate_constraints(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ConstraintsP,
        mut ImplGraphP,
        mut SolverStateP,
        mut TrailP,
        mut WatchlistsP,
    ),
    lit: Lit,
) -> Result<(), Conflict> {
    // Watches are processed by index, as a constraint may append new watches while we iterate.
    let mut index = 0;

    loop {
        let watch = match ctx.part(WatchlistsP).cons_watches(lit).get(index) {
            Some(&watch) => watch,
            None => break,
        };

        let mut step: partial!(
            Context,
            mut AssignmentP,
            mut ConstraintsP,
            mut ImplGraphP,
            mut SolverStateP,
            mut TrailP,
            mut WatchlistsP,
        ) = ctx.borrow();

        let (cons, mut step) = step.split_part_mut(ConstraintsP);
        let mut constraint = match cons.take(watch.cons) {
            Some(constraint) => constraint,
            None => {
                // Tombstoned constraint, drop the watch.
                step.part_mut(WatchlistsP).remove_cons_watch(lit, index);
                continue;
            }
        };

        let (state, mut step) = step.split_part_mut(SolverStateP);
        let (assignment, mut step) = step.split_part_mut(AssignmentP);
        let (trail, mut step) = step.split_part_mut(TrailP);
        let (graph, mut step) = step.split_part_mut(ImplGraphP);

        let mut prop_ctx = PropContext {
            this: watch.cons,
            assignment,
            trail,
            graph,
            conflict: &mut state.external_conflict,
        };

        let result = constraint.propagate(&mut prop_ctx, lit, watch.data);
        cons.untake(watch.cons, constraint);

        match result {
            PropResult::Keep => index += 1,
            PropResult::Remove => {
                step.part_mut(WatchlistsP).remove_cons_watch(lit, index);
            }
            PropResult::Conflict => return Err(Conflict::External),
        }
    }

    Ok(())
}
