//! Clauses shared between workers.
//!
//! A [`SharedLits`] is an immutable, reference counted literal array. Workers holding the same
//! lemma share one allocation; the last worker dropping its handle frees it. Since the literal
//! order is fixed, a worker cannot use the usual watched-literal permutation. Instead each worker
//! attaches a lightweight watcher view: a three literal head (two watched literals plus a cache
//! literal) and a resume cursor into the shared tail.
use std::sync::Arc;

use parasat_formula::Lit;

use super::ClauseKind;

/// An immutable shared literal array.
///
/// The `Arc` strong count is the cross-thread reference count coordinating the clause lifetime:
/// it equals the number of workers holding a view plus the number of queued distributor entries.
#[derive(Clone, Debug)]
pub struct SharedLits {
    lits: Arc<[Lit]>,
    kind: ClauseKind,
    glue: u32,
}

impl SharedLits {
    /// Create a shared literal array.
    pub fn new(lits: &[Lit], kind: ClauseKind, glue: u32) -> SharedLits {
        SharedLits {
            lits: lits.into(),
            kind,
            glue,
        }
    }

    pub fn lits(&self) -> &[Lit] {
        &self.lits
    }

    pub fn len(&self) -> usize {
        self.lits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lits.is_empty()
    }

    pub fn kind(&self) -> ClauseKind {
        self.kind
    }

    /// Glue value at creation time.
    pub fn glue(&self) -> u32 {
        self.glue
    }

    /// Number of handles currently alive.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.lits)
    }
}

/// Compact reference to a worker's view of a shared clause.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SharedClauseRef {
    index: u32,
}

impl SharedClauseRef {
    fn new(index: usize) -> SharedClauseRef {
        SharedClauseRef {
            index: index as u32,
        }
    }

    pub(crate) fn index(self) -> usize {
        self.index as usize
    }
}

/// A worker's watcher view of a shared clause.
pub struct SharedClauseSlot {
    /// `head[0]` and `head[1]` are the watched literals, `head[2]` is a cache literal believed to
    /// be non-false. All three are literals of the shared array.
    pub head: [Lit; 3],
    /// Tail scan resume position in the shared array.
    pub search: u32,
    /// Local glue value, lowered only.
    pub glue: u32,
    pub deleted: bool,
    pub lits: SharedLits,
}

/// All shared clauses watched by one worker.
#[derive(Default)]
pub struct SharedClauseDb {
    slots: Vec<Option<SharedClauseSlot>>,
    free: Vec<u32>,
    live: usize,
}

impl SharedClauseDb {
    /// Attach a watcher view for a shared clause.
    ///
    /// `head` must contain three distinct literals of the clause with the watched candidates in
    /// the first two positions. The caller is responsible for adding the watches.
    pub fn add(&mut self, lits: SharedLits, head: [Lit; 3]) -> SharedClauseRef {
        debug_assert!(lits.len() >= 4);
        debug_assert!(head.iter().all(|lit| lits.lits().contains(lit)));

        let glue = lits.glue();
        let slot = SharedClauseSlot {
            head,
            search: 3,
            glue,
            deleted: false,
            lits,
        };

        self.live += 1;

        if let Some(index) = self.free.pop() {
            debug_assert!(self.slots[index as usize].is_none());
            self.slots[index as usize] = Some(slot);
            SharedClauseRef { index }
        } else {
            self.slots.push(Some(slot));
            SharedClauseRef::new(self.slots.len() - 1)
        }
    }

    pub fn slot(&self, sref: SharedClauseRef) -> &SharedClauseSlot {
        self.slots[sref.index()].as_ref().expect("stale SharedClauseRef")
    }

    pub fn slot_mut(&mut self, sref: SharedClauseRef) -> &mut SharedClauseSlot {
        self.slots[sref.index()].as_mut().expect("stale SharedClauseRef")
    }

    /// Mark a view as deleted.
    ///
    /// The slot stays allocated until [`SharedClauseDb::compact`], so stale watches can still
    /// detect the deletion.
    pub fn delete(&mut self, sref: SharedClauseRef) {
        let slot = self.slot_mut(sref);
        debug_assert!(!slot.deleted);
        slot.deleted = true;
        self.live -= 1;
    }

    /// Number of live views.
    pub fn count(&self) -> usize {
        self.live
    }

    /// Drop deleted slots and release their shared literal references.
    ///
    /// Only valid while the watchlists are disabled, as slot indices are reused afterwards.
    pub fn compact(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.as_ref().map_or(false, |slot| slot.deleted) {
                *slot = None;
                self.free.push(index as u32);
            }
        }
    }

    /// Iterator over the live views.
    pub fn iter(&self) -> impl Iterator<Item = (SharedClauseRef, &SharedClauseSlot)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref()
                .filter(|slot| !slot.deleted)
                .map(|slot| (SharedClauseRef::new(index), slot))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lits(dimacs: &[isize]) -> Vec<Lit> {
        dimacs.iter().map(|&l| Lit::from_dimacs(l)).collect()
    }

    #[test]
    fn ref_counts_track_handles() {
        let shared = SharedLits::new(&lits(&[1, -2, 3, 4]), ClauseKind::Other, 2);
        assert_eq!(shared.ref_count(), 1);

        let second = shared.clone();
        assert_eq!(shared.ref_count(), 2);

        drop(second);
        assert_eq!(shared.ref_count(), 1);
    }

    #[test]
    fn slot_reuse_after_compact() {
        let mut db = SharedClauseDb::default();
        let clause = lits(&[1, -2, 3, 4]);
        let head = [clause[0], clause[1], clause[2]];

        let a = db.add(SharedLits::new(&clause, ClauseKind::Other, 2), head);
        let b = db.add(SharedLits::new(&clause, ClauseKind::Other, 2), head);
        assert_eq!(db.count(), 2);

        db.delete(a);
        assert_eq!(db.count(), 1);
        // Deleted slots stay allocated until compaction.
        assert_eq!(db.iter().count(), 1);

        db.compact();
        let c = db.add(SharedLits::new(&clause, ClauseKind::Other, 2), head);
        assert_eq!(c, a);
        assert_eq!(db.count(), 2);
        let _ = b;
    }
}
