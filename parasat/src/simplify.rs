//! Simplification using unit clauses.
use partial_ref::{partial, PartialRef};

use parasat_formula::Lit;

use crate::clause::db::filter_clauses;
use crate::context::{parts::*, Context};
use crate::shared::SharedContext;

/// Turn level-0 trail entries into permanent facts.
///
/// The affected variables keep their value but are removed from the trail, so later backtracking
/// and conflict analysis never consider them again.
pub fn prove_units(
    mut ctx: partial!(Context, mut ImplGraphP, mut TrailP, AssignmentP),
) -> bool {
    let mut new_unit = false;

    if ctx.part(TrailP).current_level() == 0 {
        let (impl_graph, mut ctx) = ctx.split_part_mut(ImplGraphP);
        let (trail, _ctx) = ctx.split_part_mut(TrailP);

        for &lit in trail.trail() {
            new_unit = true;
            impl_graph.update_removed_unit(lit.var());
        }

        trail.clear();
    }

    new_unit
}

/// Remove satisfied clauses and false literals.
///
/// Level-0 only. Clauses that shrink to binary or ternary size move into the short-implication
/// graph; satisfied shared views are released. Constraints get their own simplify pass and
/// scheduled destructions are swept, as no antecedent can reference them anymore.
pub fn simplify(
    mut ctx: partial!(
        Context,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ConstraintsP,
        mut SharedClausesP,
        mut WatchlistsP,
        AssignmentP,
    ),
    shared: &SharedContext,
) {
    let (assignment, mut ctx) = ctx.split_part(AssignmentP);

    let mut new_lits: Vec<Lit> = vec![];

    filter_clauses(ctx.borrow(), |alloc, cref| {
        let clause = alloc.clause_mut(cref);
        new_lits.clear();
        for &lit in clause.lits() {
            match assignment.lit_value(lit) {
                None => new_lits.push(lit),
                Some(true) => return false,
                Some(false) => (),
            }
        }
        if new_lits.len() < clause.lits().len() {
            match new_lits[..] {
                // Cannot have empty or unit clauses after full propagation. An empty clause
                // would have been a conflict and a unit clause must be satisfied and thus
                // would have been dropped above.
                [] | [_] => unreachable!(),
                [_, _] | [_, _, _] => {
                    shared.sig().add_learnt(&new_lits);
                    false
                }
                ref lits => {
                    clause.lits_mut()[..lits.len()].copy_from_slice(lits);
                    clause.header_mut().set_len(lits.len());
                    true
                }
            }
        } else {
            true
        }
    });

    // Shared views cannot shrink their literal array. Satisfied views are dropped, views with at
    // most three remaining literals move into the short-implication graph.
    let shrink: Vec<_> = {
        let shared_db = ctx.part(SharedClausesP);
        shared_db
            .iter()
            .filter_map(|(sref, slot)| {
                let lits = slot.lits.lits();
                if lits.iter().any(|&lit| assignment.lit_is_true(lit)) {
                    return Some((sref, None));
                }
                let remaining: Vec<Lit> = lits
                    .iter()
                    .cloned()
                    .filter(|&lit| !assignment.lit_is_false(lit))
                    .collect();
                if remaining.len() <= 3 {
                    Some((sref, Some(remaining)))
                } else {
                    None
                }
            })
            .collect()
    };

    for (sref, remaining) in shrink {
        if let Some(remaining) = remaining {
            // A clause that shrank below two literals would have been satisfied or a conflict
            // before reaching this point.
            debug_assert!(remaining.len() >= 2);
            shared.sig().add_learnt(&remaining);
        }
        ctx.part_mut(SharedClausesP).delete(sref);
    }

    ctx.part_mut(ConstraintsP).simplify(assignment);
}
