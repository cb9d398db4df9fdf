//! Learnt clause database reduction.
use log::debug;

use partial_ref::{partial, PartialRef};

use ordered_float::OrderedFloat;

use crate::context::{parts::*, Context};
use crate::prop::Reason;

use super::{db, ClauseRef, SharedClauseRef};

/// Delete the worst fraction of learnt clauses.
///
/// Clauses are ranked by activity with glue as tie break. Locked clauses, i.e. clauses that are
/// the reason of their first literal under the current assignment, and clauses with a glue below
/// the configured threshold are never deleted. Integrated shared views beyond the grace
/// allowance are released as well, keeping lemma exchange from growing the database without
/// bound.
pub fn reduce_learnts(
    mut ctx: partial!(
        Context,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut SharedClausesP,
        mut StatsP,
        AssignmentP,
        ImplGraphP,
        SolverConfigP,
    ),
) {
    let glue_keep = ctx.part(SolverConfigP).glue_keep;
    let reduce_fraction = ctx.part(SolverConfigP).reduce_fraction;

    let mut candidates: Vec<ClauseRef> = vec![];

    {
        let db = ctx.part(ClauseDbP);
        let alloc = ctx.part(ClauseAllocP);

        for &cref in db.clauses.iter() {
            let header = alloc.header(cref);
            if !header.deleted() && header.kind().is_learnt() && header.glue() > glue_keep {
                candidates.push(cref);
            }
        }
    }

    {
        let alloc = ctx.part(ClauseAllocP);
        candidates.sort_unstable_by_key(|&cref| {
            let header = alloc.header(cref);
            (OrderedFloat(header.activity()), !header.glue())
        });
    }

    let mut to_delete = (candidates.len() as f64 * reduce_fraction) as usize;
    let mut deleted = 0u64;

    for &cref in candidates.iter() {
        if to_delete == 0 {
            break;
        }

        let locked = {
            let first = ctx.part(ClauseAllocP).clause(cref).lits()[0];
            ctx.part(AssignmentP).lit_is_true(first)
                && ctx.part(ImplGraphP).reason(first.var()) == &Reason::Long(cref)
        };

        if locked {
            continue;
        }

        db::delete_clause(ctx.borrow(), cref);
        to_delete -= 1;
        deleted += 1;
    }

    deleted += reduce_shared_views(ctx.borrow());

    let kept = ctx.part(ClauseDbP).learnt_count() as u64;
    let stats = ctx.part_mut(StatsP);
    stats.deleted_clauses += deleted;
    stats.reductions += 1;
    stats.learnt_clauses = kept;

    debug!("reduced learnt db: {} deleted, {} kept", deleted, kept);
}

/// Release integrated shared views beyond the grace allowance.
///
/// Problem clauses and locked views are never released.
fn reduce_shared_views(
    mut ctx: partial!(
        Context,
        mut SharedClausesP,
        AssignmentP,
        ImplGraphP,
        SolverConfigP,
    ),
) -> u64 {
    let grace = ctx.part(SolverConfigP).integration.grace;
    let glue_keep = ctx.part(SolverConfigP).glue_keep;

    let mut excess = {
        let shared_db = ctx.part(SharedClausesP);
        let integrated = shared_db
            .iter()
            .filter(|(_, slot)| slot.lits.kind().is_learnt())
            .count();
        integrated.saturating_sub(grace)
    };

    if excess == 0 {
        return 0;
    }

    let mut to_delete: Vec<SharedClauseRef> = vec![];

    {
        let mut scan: partial!(
            Context,
            mut SharedClausesP,
            AssignmentP,
            ImplGraphP,
            SolverConfigP,
        ) = ctx.borrow();
        let (shared_db, scan) = scan.split_part(SharedClausesP);
        for (sref, slot) in shared_db.iter() {
            if excess == 0 {
                break;
            }
            if !slot.lits.kind().is_learnt() || slot.glue <= glue_keep {
                continue;
            }

            let first = slot.head[0];
            let locked = scan.part(AssignmentP).lit_is_true(first)
                && scan.part(ImplGraphP).reason(first.var()) == &Reason::Shared(sref);
            if locked {
                continue;
            }

            to_delete.push(sref);
            excess -= 1;
        }
    }

    let deleted = to_delete.len() as u64;
    for sref in to_delete {
        ctx.part_mut(SharedClausesP).delete(sref);
    }
    deleted
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use parasat_formula::Lit;

    use crate::clause::{ClauseHeader, ClauseKind};
    use crate::context::set_var_count;
    use crate::prop::enqueue_assignment;

    fn learnt_clause(
        mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP, mut WatchlistsP),
        glue: u32,
        activity: f32,
        dimacs: [isize; 4],
    ) -> ClauseRef {
        let mut header = ClauseHeader::new(ClauseKind::Conflict);
        header.set_glue(glue);
        header.set_activity(activity);
        let lits: Vec<Lit> = dimacs.iter().map(|&l| Lit::from_dimacs(l)).collect();
        db::add_clause(ctx.borrow(), header, &lits)
    }

    #[test]
    fn reduction_spares_locked_and_low_glue_clauses() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();
        set_var_count(ctx.borrow(), 16);

        // Glue at most the keep threshold: never a deletion candidate.
        let tight = learnt_clause(ctx.borrow(), 2, 0.0, [1, 2, 3, 4]);
        // Worst score, but the reason of its first literal: locked.
        let locked = learnt_clause(ctx.borrow(), 9, 0.0, [5, 6, 7, 8]);
        // Worst unlocked score: the one reduction is allowed to take.
        let cold = learnt_clause(ctx.borrow(), 9, 0.0, [9, 10, 11, 12]);
        // Same glue but higher activity: survives the 50 % cut.
        let warm = learnt_clause(ctx.borrow(), 9, 5.0, [13, 14, 15, 16]);

        enqueue_assignment(ctx.borrow(), Lit::from_dimacs(5), Reason::Long(locked));

        assert_eq!(ctx.part(ClauseDbP).learnt_count(), 4);

        reduce_learnts(ctx.borrow());

        let alloc = ctx.part(ClauseAllocP);
        assert!(!alloc.header(tight).deleted());
        assert!(!alloc.header(locked).deleted());
        assert!(!alloc.header(warm).deleted());
        assert!(alloc.header(cold).deleted());

        assert_eq!(ctx.part(ClauseDbP).learnt_count(), 3);
        assert_eq!(ctx.part(StatsP).deleted_clauses, 1);
    }
}
