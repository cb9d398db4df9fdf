//! Watchlists to detect clauses that became unit.
//!
//! Each long clause has two watches pointing to it, kept in the watchlists of two different
//! literals of the clause. Whenever the watches are moved to different literals the literals of
//! the clause are permuted so the watched literals are in position 0 and 1.
//!
//! When a clause is not unit under the current assignment, the watched literals point at two
//! non-false literals. When a clause is unit and thus propagating, the true literal is watched and
//! in position 0, the other watched literal is the one with the largest decision level and kept in
//! position 1. When a clause becomes satisfied before becoming unit the watches can be kept as
//! they were.
//!
//! There is no need to update watchlists on backtracking, as unassigning variables cannot
//! invalidate the invariant.
//!
//! As an optimization we use blocking literals: each watch stores a literal of the clause
//! different from the watched literal. When that literal is true the clause is already satisfied
//! and the clause storage doesn't have to be accessed at all, skipping the cache-literal lookup
//! entirely for clauses whose literal order we are free to permute.
//!
//! Shared clauses have an immutable literal array, so their watches cannot permute the clause.
//! They are kept in a second list and carry their watch state in the local head of the shared
//! clause view.
//!
//! The third layer contains virtual watches of generic constraints. These are never invalidated
//! by clause storage reorganization and survive a rebuild.
use partial_ref::{partial, PartialRef};

use parasat_formula::Lit;

use crate::clause::{ClauseRef, SharedClauseRef};
use crate::cons::ConstraintRef;
use crate::context::{parts::*, Context};

/// A watch on a long clause.
#[derive(Copy, Clone)]
pub struct Watch {
    /// Clause which has the referring lit in position 0 or 1.
    pub cref: ClauseRef,
    /// A lit of the clause, different from the referring lit.
    pub blocking: Lit,
}

/// A watch on a shared clause view.
#[derive(Copy, Clone)]
pub struct SharedWatch {
    /// View which has the referring lit in head position 0 or 1.
    pub sref: SharedClauseRef,
    /// A lit of the clause, different from the referring lit.
    pub blocking: Lit,
}

/// A virtual watch of a generic constraint.
#[derive(Copy, Clone)]
pub struct ConsWatch {
    pub cons: ConstraintRef,
    /// Payload passed back to the constraint's propagate.
    pub data: u32,
}

/// Watchlists to detect clauses that became unit.
#[derive(Default)]
pub struct Watchlists {
    /// Watches for long clauses, indexed by the falsified literal's negation.
    watches: Vec<Vec<Watch>>,
    /// Watches for shared clause views, same indexing.
    shared: Vec<Vec<SharedWatch>>,
    /// Virtual constraint watches, triggered when the indexing literal becomes true.
    cons: Vec<Vec<ConsWatch>>,
    /// Whether the clause watch layers are up to date.
    enabled: bool,
}

impl Watchlists {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.watches.resize(count * 2, vec![]);
        self.shared.resize(count * 2, vec![]);
        self.cons.resize(count * 2, vec![]);
    }

    /// Start watching a clause.
    ///
    /// `lits` have to be the first two literals of the given clause.
    pub fn watch_clause(&mut self, cref: ClauseRef, lits: [Lit; 2]) {
        if !self.enabled {
            return;
        }
        for i in 0..2 {
            let watch = Watch {
                cref,
                blocking: lits[i ^ 1],
            };
            self.watches[(!lits[i]).code()].push(watch);
        }
    }

    /// Return watches for a given literal.
    pub fn watched_by_mut(&mut self, lit: Lit) -> &mut Vec<Watch> {
        &mut self.watches[lit.code()]
    }

    /// Make a literal watch a clause.
    pub fn add_watch(&mut self, lit: Lit, watch: Watch) {
        self.watches[lit.code()].push(watch)
    }

    /// Start watching a shared clause view.
    ///
    /// `lits` have to be the first two head literals of the view.
    pub fn watch_shared_clause(&mut self, sref: SharedClauseRef, lits: [Lit; 2]) {
        if !self.enabled {
            return;
        }
        for i in 0..2 {
            let watch = SharedWatch {
                sref,
                blocking: lits[i ^ 1],
            };
            self.shared[(!lits[i]).code()].push(watch);
        }
    }

    /// Return shared watches for a given literal.
    pub fn shared_watched_by_mut(&mut self, lit: Lit) -> &mut Vec<SharedWatch> {
        &mut self.shared[lit.code()]
    }

    /// Make a literal watch a shared clause view.
    pub fn add_shared_watch(&mut self, lit: Lit, watch: SharedWatch) {
        self.shared[lit.code()].push(watch)
    }

    /// Register a virtual constraint watch on a literal.
    pub fn add_cons_watch(&mut self, lit: Lit, watch: ConsWatch) {
        self.cons[lit.code()].push(watch)
    }

    /// Virtual watches of a literal.
    pub fn cons_watches(&self, lit: Lit) -> &[ConsWatch] {
        &self.cons[lit.code()]
    }

    /// Remove a virtual watch by position.
    pub fn remove_cons_watch(&mut self, lit: Lit, index: usize) {
        self.cons[lit.code()].swap_remove(index);
    }

    /// Whether the clause watch layers are up to date.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Invalidate the clause watch layers.
    ///
    /// They are rebuilt on the next propagation. The constraint layer stays valid.
    pub fn disable(&mut self) {
        self.enabled = false;
        for watchlist in self.watches.iter_mut() {
            watchlist.clear();
        }
        for watchlist in self.shared.iter_mut() {
            watchlist.clear();
        }
    }
}

/// Rebuild the clause watch layers from the clause databases.
pub fn rebuild_watchlists(
    mut ctx: partial!(
        Context,
        mut SharedClausesP,
        mut WatchlistsP,
        ClauseAllocP,
        ClauseDbP,
    ),
) {
    ctx.part_mut(SharedClausesP).compact();

    let (watchlists, mut ctx) = ctx.split_part_mut(WatchlistsP);
    watchlists.enabled = true;

    let (db, mut ctx) = ctx.split_part(ClauseDbP);
    let (alloc, ctx) = ctx.split_part(ClauseAllocP);

    for &cref in db.clauses.iter() {
        let clause = alloc.clause(cref);
        if !clause.header().deleted() {
            let lits = clause.lits();
            watchlists.watch_clause(cref, [lits[0], lits[1]]);
        }
    }

    for (sref, slot) in ctx.part(SharedClausesP).iter() {
        watchlists.watch_shared_clause(sref, [slot.head[0], slot.head[1]]);
    }
}
