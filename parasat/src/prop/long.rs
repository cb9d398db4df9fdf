//! Propagation of long and shared clauses.
use std::mem::replace;

use partial_ref::{partial, PartialRef};

use parasat_formula::Lit;

use crate::context::{parts::*, Context};

use super::{enqueue_raw, Conflict, Reason, SharedWatch, Watch};

/// Propagate all literals implied by long clauses watched by the given literal.
///
/// On conflict return the clause propagating the conflicting assignment.
///
/// The watch list of the literal is taken out of the watchlists and compacted in place while
/// scanning: watches whose clause found a replacement literal move to another list, everything
/// else is written back. Taking the list keeps the borrow checker out of the way when watches
/// are pushed onto other literals' lists mid-scan.
///
/// See [`crate::prop::watch`] for the invariants that this has to uphold.
pub fn propagate_long(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ClauseAllocP,
        mut ImplGraphP,
        mut SharedClausesP,
        mut TrailP,
        mut WatchlistsP,
    ),
    lit: Lit,
) -> Result<(), Conflict> {
    {
        let mut scan_ctx: partial!(
            Context,
            mut AssignmentP,
            mut ClauseAllocP,
            mut ImplGraphP,
            mut SharedClausesP,
            mut TrailP,
            mut WatchlistsP,
        ) = ctx.borrow();
        let (watchlists, mut scan_ctx) = scan_ctx.split_part_mut(WatchlistsP);
        let (alloc, mut scan_ctx) = scan_ctx.split_part_mut(ClauseAllocP);
        let (assignment, mut scan_ctx) = scan_ctx.split_part_mut(AssignmentP);
        let (trail, mut scan_ctx) = scan_ctx.split_part_mut(TrailP);
        let graph = scan_ctx.part_mut(ImplGraphP);

        let false_lit = !lit;

        let mut list = replace(watchlists.watched_by_mut(lit), Vec::new());
        let mut keep = 0;
        let mut result = Ok(());

        'watches: for read in 0..list.len() {
            let watch = list[read];

            // A true blocking literal satisfies the clause without touching the clause storage.
            if assignment.lit_is_true(watch.blocking) {
                list[keep] = watch;
                keep += 1;
                continue;
            }

            let cref = watch.cref;
            let header = *alloc.header(cref);

            // Deleted clauses are unwatched lazily.
            if header.deleted() {
                continue;
            }

            let lits = alloc.clause_mut(cref).lits_mut();

            // Move the falsified literal into position 1. Future propagations expect the
            // propagated literal in position 0, and a satisfied clause can keep this order.
            if lits[0] == false_lit {
                lits.swap(0, 1);
            }
            debug_assert_eq!(lits[1], false_lit);

            let first = lits[0];
            let new_watch = Watch {
                cref,
                blocking: first,
            };

            if first != watch.blocking && assignment.lit_is_true(first) {
                list[keep] = new_watch;
                keep += 1;
                continue;
            }

            // Look for a non-false literal in the tail to take over this watch.
            for pos in 2..header.len() {
                let rest_lit = lits[pos];
                if !assignment.lit_is_false(rest_lit) {
                    lits[1] = rest_lit;
                    lits[pos] = false_lit;
                    watchlists.add_watch(!rest_lit, new_watch);
                    continue 'watches;
                }
            }

            // The whole tail is false, so the clause is unit or conflicting.
            list[keep] = new_watch;
            keep += 1;

            if assignment.lit_is_false(first) {
                // Keep all unprocessed watches and report the conflict.
                for rest in read + 1..list.len() {
                    list[keep] = list[rest];
                    keep += 1;
                }
                result = Err(Conflict::Long(cref));
                break;
            }

            if !assignment.lit_is_true(first) {
                enqueue_raw(assignment, trail, graph, first, Reason::Long(cref));
            }
        }

        list.truncate(keep);
        *watchlists.watched_by_mut(lit) = list;

        result?;
    }

    propagate_shared(ctx.borrow(), lit)
}

/// Propagate all literals implied by shared clauses watched by the given literal.
///
/// Shared clauses cannot permute their literal array, so the watch state lives in the local
/// three-literal head of the view: the cache literal in head position 2 is tried first, then the
/// shared tail is scanned from the saved resume cursor.
fn propagate_shared(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ImplGraphP,
        mut SharedClausesP,
        mut TrailP,
        mut WatchlistsP,
    ),
    lit: Lit,
) -> Result<(), Conflict> {
    let (shared_db, mut ctx) = ctx.split_part_mut(SharedClausesP);
    let (watchlists, mut ctx) = ctx.split_part_mut(WatchlistsP);
    let (assignment, mut ctx) = ctx.split_part_mut(AssignmentP);
    let (trail, mut ctx) = ctx.split_part_mut(TrailP);
    let graph = ctx.part_mut(ImplGraphP);

    let false_lit = !lit;

    let mut list = replace(watchlists.shared_watched_by_mut(lit), Vec::new());
    let mut keep = 0;
    let mut result = Ok(());

    'watchers: for read in 0..list.len() {
        let watch = list[read];

        if assignment.lit_is_true(watch.blocking) {
            list[keep] = watch;
            keep += 1;
            continue;
        }

        let sref = watch.sref;
        let slot = shared_db.slot_mut(sref);

        if slot.deleted {
            continue;
        }

        if slot.head[0] == false_lit {
            slot.head.swap(0, 1);
        }
        debug_assert_eq!(slot.head[1], false_lit);

        let first = slot.head[0];
        let new_watch = SharedWatch {
            sref,
            blocking: first,
        };

        if first != watch.blocking && assignment.lit_is_true(first) {
            list[keep] = new_watch;
            keep += 1;
            continue;
        }

        // Try the cache literal before walking the shared array.
        let cache = slot.head[2];
        if cache != first && !assignment.lit_is_false(cache) {
            slot.head[1] = cache;
            slot.head[2] = false_lit;
            watchlists.add_shared_watch(!cache, new_watch);
            continue;
        }

        // Scan the shared tail from the resume cursor.
        let len = slot.lits.len();
        let mut found = None;
        {
            let lits = slot.lits.lits();
            let start = slot.search as usize % len;
            for step in 0..len {
                let pos = (start + step) % len;
                let rest_lit = lits[pos];
                if rest_lit != first && !assignment.lit_is_false(rest_lit) {
                    found = Some((pos, rest_lit));
                    break;
                }
            }
        }

        if let Some((pos, rest_lit)) = found {
            slot.search = ((pos + 1) % len) as u32;
            slot.head[1] = rest_lit;
            watchlists.add_shared_watch(!rest_lit, new_watch);
            continue 'watchers;
        }

        // No replacement found, the clause is unit or conflicting.
        list[keep] = new_watch;
        keep += 1;

        if assignment.lit_is_false(first) {
            // Keep all unprocessed watches.
            for tail in read + 1..list.len() {
                list[keep] = list[tail];
                keep += 1;
            }
            result = Err(Conflict::Shared(sref));
            break;
        }

        if !assignment.lit_is_true(first) {
            enqueue_raw(assignment, trail, graph, first, Reason::Shared(sref));
        }
    }

    list.truncate(keep);
    *watchlists.shared_watched_by_mut(lit) = list;

    result
}
