//! Garbage collection of long clauses.
use partial_ref::{partial, PartialRef};

use crate::context::{parts::*, Context};
use crate::prop::Reason;

use super::{ClauseAlloc, ClauseRef};

/// A collection runs once the garbage exceeds the live data, which amortizes the copying costs
/// over the deletions that produced the garbage.
const GARBAGE_FRACTION: usize = 2;

/// Perform a garbage collection of long clauses if necessary.
pub fn collect_garbage(
    mut ctx: partial!(
        Context,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut WatchlistsP,
        TrailP,
    ),
) {
    let garbage = ctx.part(ClauseDbP).garbage_size;
    if garbage * GARBAGE_FRACTION > ctx.part(ClauseAllocP).buffer_size() {
        collect_garbage_now(ctx.borrow());
    }
}

/// Unconditionally perform a garbage collection of long clauses.
///
/// The surviving clauses move to a fresh allocator. A remap table from old to new clause
/// references is kept during the move; the watchlists are simply invalidated and rebuilt on the
/// next propagation, while antecedents on the trail are rewritten through the table. The table
/// is in allocation order on both sides, so lookups are binary searches.
fn collect_garbage_now(
    mut ctx: partial!(
        Context,
        mut ClauseAllocP,
        mut ClauseDbP,
        mut ImplGraphP,
        mut WatchlistsP,
        TrailP,
    ),
) {
    ctx.part_mut(WatchlistsP).disable();

    let (db, mut ctx) = ctx.split_part_mut(ClauseDbP);

    assert!(
        db.garbage_size <= ctx.part(ClauseAllocP).buffer_size(),
        "clause db accounts more garbage than the allocator holds"
    );
    let live_size = ctx.part(ClauseAllocP).buffer_size() - db.garbage_size;

    // Allocating just the live size would lead to immediate growing when the next clauses are
    // learned, so leave headroom.
    let mut new_alloc = ClauseAlloc::with_capacity(live_size * 2);
    let mut moved: Vec<(ClauseRef, ClauseRef)> = Vec::with_capacity(db.clauses.len());

    {
        let alloc = ctx.part(ClauseAllocP);
        for &cref in db.clauses.iter() {
            let clause = alloc.clause(cref);
            if !clause.header().deleted() {
                let new_cref = new_alloc.add_clause(*clause.header(), clause.lits());
                moved.push((cref, new_cref));
            }
        }
    }

    db.clauses = moved.iter().map(|&(_, new_cref)| new_cref).collect();
    db.garbage_size = 0;
    *ctx.part_mut(ClauseAllocP) = new_alloc;

    // Clauses acting as antecedents are never deleted, so every long reason on the trail has an
    // entry in the remap table.
    let (trail, mut ctx) = ctx.split_part(TrailP);
    let impl_graph = ctx.part_mut(ImplGraphP);

    for &lit in trail.trail().iter() {
        if let &Reason::Long(old_cref) = impl_graph.reason(lit.var()) {
            let table_pos = moved
                .binary_search_by_key(&old_cref, |&(old, _)| old)
                .expect("antecedent clause lost during garbage collection");
            impl_graph.update_reason(lit.var(), Reason::Long(moved[table_pos].1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cmp::max;

    use partial_ref::IntoPartialRefMut;
    use proptest::*;

    use parasat_formula::{cnf::strategy::*, Lit};

    use crate::clause::{db, ClauseHeader, ClauseKind};
    use crate::context::set_var_count;
    use crate::prop::enqueue_assignment;

    proptest! {
        #[test]
        fn garbage_collection(
            deleted_input in cnf_formula(2..100usize, 500..1000, 4..30),
            kept_input in cnf_formula(2..100usize, 10..500, 4..20),
        ) {
            let mut ctx = Context::default();
            let mut ctx = ctx.into_partial_ref_mut();

            set_var_count(
                ctx.borrow(),
                max(deleted_input.var_count(), kept_input.var_count()),
            );

            let mut deleted_crefs = vec![];

            for lits in deleted_input.iter() {
                let header = ClauseHeader::new(ClauseKind::Problem);
                deleted_crefs.push(db::add_clause(ctx.borrow(), header, lits));
            }

            for lits in kept_input.iter() {
                let header = ClauseHeader::new(ClauseKind::Conflict);
                let cref = db::add_clause(ctx.borrow(), header, lits);

                if ctx.part(AssignmentP).lit_value(lits[0]) == None {
                    // Not a consistent propagation, but garbage collection only cares that the
                    // clause in reason position survives and is remapped.
                    enqueue_assignment(ctx.borrow(), lits[0], Reason::Long(cref));
                }
            }

            for cref in deleted_crefs {
                db::delete_clause(ctx.borrow(), cref);
                prop_assert!(ctx.part(ClauseDbP).garbage_size > 0);
            }

            let buffer_size_before = ctx.part(ClauseAllocP).buffer_size();

            collect_garbage(ctx.borrow());

            // The collection actually ran and freed the space of the deleted clauses.
            prop_assert!(ctx.part(ClauseAllocP).buffer_size() < buffer_size_before);
            prop_assert_eq!(ctx.part(ClauseDbP).garbage_size, 0);
            prop_assert!(!ctx.part(WatchlistsP).enabled());

            // Exactly the kept clauses survive, with their literals intact.
            let mut output_clauses: Vec<Vec<Lit>> = vec![];
            for &cref in ctx.part(ClauseDbP).clauses.iter() {
                let clause = ctx.part(ClauseAllocP).clause(cref);
                prop_assert!(!clause.header().deleted());
                output_clauses.push(clause.lits().to_vec());
            }

            let mut input_clauses: Vec<Vec<Lit>> =
                kept_input.iter().map(|c| c.to_vec()).collect();

            output_clauses.sort();
            input_clauses.sort();
            prop_assert_eq!(input_clauses, output_clauses);

            // Every long antecedent was remapped to a clause that still asserts its literal.
            for &lit in ctx.part(TrailP).trail() {
                if let &Reason::Long(cref) = ctx.part(ImplGraphP).reason(lit.var()) {
                    prop_assert_eq!(ctx.part(ClauseAllocP).clause(cref).lits()[0], lit);
                }
            }
        }
    }
}
