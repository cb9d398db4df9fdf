//! Database for long clauses.
use partial_ref::{partial, PartialRef};

use parasat_formula::Lit;

use super::{header::HEADER_LEN, ClauseHeader, ClauseKind, ClauseRef};

use crate::context::{parts::*, Context};

/// Database for long clauses.
///
/// Removal of clauses from the `clauses` field can be delayed. The clause header's deleted flag
/// needs to be checked when iterating over it.
#[derive(Default)]
pub struct ClauseDb {
    /// May contain deleted clauses, see above
    pub(crate) clauses: Vec<ClauseRef>,
    /// These counts are always up to date
    count_by_kind: [usize; ClauseKind::count()],
    /// Size of deleted but not collected clauses
    pub(crate) garbage_size: usize,
}

impl ClauseDb {
    /// The number of long clauses of a given kind.
    pub fn count_by_kind(&self, kind: ClauseKind) -> usize {
        self.count_by_kind[kind as usize]
    }

    /// The number of learnt long clauses.
    pub fn learnt_count(&self) -> usize {
        self.count_by_kind[ClauseKind::Conflict as usize]
            + self.count_by_kind[ClauseKind::Loop as usize]
            + self.count_by_kind[ClauseKind::Other as usize]
    }
}

/// Add a long clause to the database.
///
/// The clause is also watched.
pub fn add_clause(
    mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP, mut WatchlistsP),
    header: ClauseHeader,
    lits: &[Lit],
) -> ClauseRef {
    let kind = header.kind();

    let cref = ctx.part_mut(ClauseAllocP).add_clause(header, lits);

    let db = ctx.part_mut(ClauseDbP);
    db.clauses.push(cref);
    db.count_by_kind[kind as usize] += 1;

    ctx.part_mut(WatchlistsP)
        .watch_clause(cref, [lits[0], lits[1]]);

    cref
}

/// Delete a long clause from the database.
///
/// The watches of the clause are not removed immediately, they lazily notice the deletion when
/// they are processed.
pub fn delete_clause(
    mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP),
    cref: ClauseRef,
) {
    let (alloc, mut ctx) = ctx.split_part_mut(ClauseAllocP);
    let db = ctx.part_mut(ClauseDbP);

    let header = alloc.header_mut(cref);

    debug_assert!(!header.deleted(), "delete_clause for already deleted clause");

    header.set_deleted(true);

    db.count_by_kind[header.kind() as usize] -= 1;

    db.garbage_size += header.len() + HEADER_LEN;
}

/// Remove all long clauses not satisfying a predicate.
///
/// Watchlists are invalidated and rebuilt on the next propagation.
pub fn filter_clauses<F>(
    mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP, mut WatchlistsP),
    mut filter: F,
) where
    F: FnMut(&mut super::ClauseAlloc, ClauseRef) -> bool,
{
    ctx.part_mut(WatchlistsP).disable();

    let (db, mut ctx) = ctx.split_part_mut(ClauseDbP);
    let alloc = ctx.part_mut(ClauseAllocP);

    let count_by_kind = &mut db.count_by_kind;
    let garbage_size = &mut db.garbage_size;

    db.clauses.retain(|&cref| {
        if alloc.header(cref).deleted() {
            false
        } else if filter(alloc, cref) {
            true
        } else {
            let header = alloc.header_mut(cref);
            header.set_deleted(true);
            count_by_kind[header.kind() as usize] -= 1;
            *garbage_size += header.len() + HEADER_LEN;
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    #[test]
    fn kind_counts_and_deletes() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();

        crate::context::set_var_count(ctx.borrow(), 10);

        let clauses = cnf_formula![
            1, 2, 3, 9;
            4, -5, 6, -9;
            -2, 3, -4, 5;
            -3, 5, 2, 7, 5;
        ];

        let kinds = vec![
            ClauseKind::Problem,
            ClauseKind::Conflict,
            ClauseKind::Loop,
            ClauseKind::Other,
        ];

        let mut crefs = vec![];

        for (clause, &kind) in clauses.iter().zip(kinds.iter()) {
            let header = ClauseHeader::new(kind);
            let cref = add_clause(ctx.borrow(), header, clause);
            crefs.push(cref);
        }

        assert_eq!(ctx.part(ClauseDbP).count_by_kind(ClauseKind::Problem), 1);
        assert_eq!(ctx.part(ClauseDbP).count_by_kind(ClauseKind::Conflict), 1);
        assert_eq!(ctx.part(ClauseDbP).learnt_count(), 3);

        delete_clause(ctx.borrow(), crefs[0]);
        delete_clause(ctx.borrow(), crefs[3]);

        assert_eq!(ctx.part(ClauseDbP).count_by_kind(ClauseKind::Problem), 0);
        assert_eq!(ctx.part(ClauseDbP).count_by_kind(ClauseKind::Other), 0);
        assert_eq!(ctx.part(ClauseDbP).learnt_count(), 2);
        assert!(ctx.part(ClauseDbP).garbage_size > 0);
    }
}
