//! The short-implication graph.
//!
//! Binary and ternary clauses are not stored as clause objects. Instead every literal `p` has an
//! implication list holding the consequences of `p` becoming true: a partner `q` for each binary
//! clause `{¬p, q}` and a pair `(q, r)` for each ternary clause `{¬p, q, r}`. Every clause is
//! entered into the lists of all its literals, so each edge can be found from all endpoints.
//!
//! Problem edges are plain vectors, mutated only while the shared context is unfrozen. Learnt
//! edges arrive concurrently from all workers during solving and are stored in a per-literal
//! lock-free chain of fixed-size blocks:
//!
//! - A block publishes entries through a single `size|lock` word. Writers take the lock bit with a
//!   CAS, write the entry and release it with a release-store of the increased size. Readers
//!   acquire-load the word and only read the published prefix, so they never observe a partially
//!   written entry and never block.
//! - Full blocks are immutable. A writer finding the head block full prepends a fresh block with a
//!   release CAS on the head pointer.
//! - Blocks are only freed when the graph is dropped.
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicUsize, Ordering};

use partial_ref::{partial, PartialRef};

use parasat_formula::{lit::LitIdx, Lit};

use crate::context::{parts::*, Context};
use crate::prop::{enqueue_assignment, Assignment, Conflict, Reason};

/// Entries per learnt block.
///
/// Sized so a block fills one cache line.
const BLOCK_CAP: usize = 6;

const LOCK_BIT: u32 = 1;

/// Sentinel marking the second slot of a binary entry.
const NO_LIT: LitIdx = LitIdx::max_value();

/// A block of learnt implications.
struct Block {
    /// Bit 0 is the writer lock, the remaining bits hold the number of published entries.
    size_lock: AtomicU32,
    /// Older block in the chain, immutable after construction.
    next: *mut Block,
    /// Entry slots, valid below the published size.
    data: [UnsafeCell<[LitIdx; 2]>; BLOCK_CAP],
}

impl Block {
    fn new(next: *mut Block) -> Box<Block> {
        Box::new(Block {
            size_lock: AtomicU32::new(0),
            next,
            data: Default::default(),
        })
    }
}

/// Implications of a single literal.
#[derive(Default)]
pub struct ImplicationList {
    pub(crate) bin: Vec<Lit>,
    pub(crate) tern: Vec<[Lit; 2]>,
    learnt: AtomicPtr<Block>,
}

impl ImplicationList {
    /// Append a learnt implication.
    ///
    /// Safe to call concurrently from multiple threads.
    fn push_learnt(&self, entry: [LitIdx; 2]) {
        let mut spare: Option<Box<Block>> = None;

        loop {
            let head = self.learnt.load(Ordering::Acquire);

            if !head.is_null() {
                let block = unsafe { &*head };
                let size_lock = block.size_lock.load(Ordering::Relaxed);

                if size_lock & LOCK_BIT != 0 {
                    std::hint::spin_loop();
                    continue;
                }

                let size = (size_lock >> 1) as usize;
                if size < BLOCK_CAP {
                    if block
                        .size_lock
                        .compare_exchange_weak(
                            size_lock,
                            size_lock | LOCK_BIT,
                            Ordering::Acquire,
                            Ordering::Relaxed,
                        )
                        .is_err()
                    {
                        continue;
                    }
                    unsafe {
                        *block.data[size].get() = entry;
                    }
                    block
                        .size_lock
                        .store(((size + 1) as u32) << 1, Ordering::Release);
                    return;
                }
            }

            // The chain is empty or its head block is full, prepend a fresh block.
            let mut block = spare.take().unwrap_or_else(|| Block::new(std::ptr::null_mut()));
            block.next = head;
            *block.data[0].get_mut() = entry;
            *block.size_lock.get_mut() = 1 << 1;

            let ptr = Box::into_raw(block);
            match self
                .learnt
                .compare_exchange(head, ptr, Ordering::Release, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(_) => {
                    // Lost the race, retry with the same block.
                    spare = Some(unsafe { Box::from_raw(ptr) });
                }
            }
        }
    }

    /// Iterator over the published learnt implications.
    pub fn learnt(&self) -> LearntIter<'_> {
        let block = self.learnt.load(Ordering::Acquire);
        let len = if block.is_null() {
            0
        } else {
            (unsafe { &*block }.size_lock.load(Ordering::Acquire) >> 1) as usize
        };
        LearntIter {
            block,
            pos: 0,
            len,
            _marker: PhantomData,
        }
    }

    /// Whether there are no implications at all.
    pub fn is_empty(&self) -> bool {
        self.bin.is_empty() && self.tern.is_empty() && self.learnt.load(Ordering::Acquire).is_null()
    }
}

impl Drop for ImplicationList {
    fn drop(&mut self) {
        let mut block = *self.learnt.get_mut();
        while !block.is_null() {
            let boxed = unsafe { Box::from_raw(block) };
            block = boxed.next;
        }
    }
}

/// Iterator over learnt implications of one literal.
pub struct LearntIter<'a> {
    block: *const Block,
    pos: usize,
    len: usize,
    _marker: PhantomData<&'a ImplicationList>,
}

impl<'a> Iterator for LearntIter<'a> {
    type Item = (Lit, Option<Lit>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.block.is_null() {
                return None;
            }
            if self.pos < self.len {
                let entry = unsafe { *(*self.block).data[self.pos].get() };
                self.pos += 1;
                let other = Lit::from_code(entry[0] as usize);
                let third = if entry[1] == NO_LIT {
                    None
                } else {
                    Some(Lit::from_code(entry[1] as usize))
                };
                return Some((other, third));
            }
            self.block = unsafe { (*self.block).next };
            self.pos = 0;
            self.len = if self.block.is_null() {
                0
            } else {
                (unsafe { &*self.block }.size_lock.load(Ordering::Acquire) >> 1) as usize
            };
        }
    }
}

/// Specialized storage for binary and ternary clauses.
#[derive(Default)]
pub struct ShortImplGraph {
    /// Indexed by literal code.
    graph: Vec<ImplicationList>,
    bin_problem: usize,
    tern_problem: usize,
    bin_learnt: AtomicUsize,
    tern_learnt: AtomicUsize,
}

impl ShortImplGraph {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.graph.resize_with(count * 2, ImplicationList::default);
    }

    /// Implications of a literal.
    pub fn list(&self, lit: Lit) -> &ImplicationList {
        &self.graph[lit.code()]
    }

    /// Add a binary or ternary problem clause.
    ///
    /// Only valid while the shared context is unfrozen.
    pub fn add_problem(&mut self, lits: &[Lit]) {
        match *lits {
            [a, b] => {
                self.graph[(!a).code()].bin.push(b);
                self.graph[(!b).code()].bin.push(a);
                self.bin_problem += 1;
            }
            [a, b, c] => {
                self.graph[(!a).code()].tern.push([b, c]);
                self.graph[(!b).code()].tern.push([a, c]);
                self.graph[(!c).code()].tern.push([a, b]);
                self.tern_problem += 1;
            }
            _ => unreachable!("short implication graph stores binary and ternary clauses"),
        }
    }

    /// Add a binary or ternary learnt clause.
    ///
    /// Safe to call concurrently during solving; the new edge becomes visible to other workers
    /// through an acquire/release handshake on the containing block.
    pub fn add_learnt(&self, lits: &[Lit]) {
        match *lits {
            [a, b] => {
                self.graph[(!a).code()].push_learnt([b.code() as LitIdx, NO_LIT]);
                self.graph[(!b).code()].push_learnt([a.code() as LitIdx, NO_LIT]);
                self.bin_learnt.fetch_add(1, Ordering::Relaxed);
            }
            [a, b, c] => {
                self.graph[(!a).code()].push_learnt([b.code() as LitIdx, c.code() as LitIdx]);
                self.graph[(!b).code()].push_learnt([a.code() as LitIdx, c.code() as LitIdx]);
                self.graph[(!c).code()].push_learnt([a.code() as LitIdx, b.code() as LitIdx]);
                self.tern_learnt.fetch_add(1, Ordering::Relaxed);
            }
            _ => unreachable!("short implication graph stores binary and ternary clauses"),
        }
    }

    /// Number of binary clauses, problem and learnt.
    pub fn bin_count(&self) -> (usize, usize) {
        (self.bin_problem, self.bin_learnt.load(Ordering::Relaxed))
    }

    /// Number of ternary clauses, problem and learnt.
    pub fn tern_count(&self) -> (usize, usize) {
        (self.tern_problem, self.tern_learnt.load(Ordering::Relaxed))
    }

    /// Search for an alternative antecedent of the true literal `¬p`.
    ///
    /// `ok` receives the partner literals of an edge containing `¬p`; when it accepts all partners
    /// of some edge the search succeeds. Used to tighten learnt clauses during conflict analysis.
    pub fn reverse_arc(&self, p: Lit, ok: &mut dyn FnMut(Lit) -> bool) -> bool {
        let list = &self.graph[p.code()];

        for &q in list.bin.iter() {
            if ok(q) {
                return true;
            }
        }
        for &[q, r] in list.tern.iter() {
            if ok(q) && ok(r) {
                return true;
            }
        }
        for (q, third) in list.learnt() {
            match third {
                None => {
                    if ok(q) {
                        return true;
                    }
                }
                Some(r) => {
                    if ok(q) && ok(r) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Remove all problem edges of clauses satisfied by `p` and degrade ternary edges containing
    /// `¬p` to binary edges.
    ///
    /// Only valid while the graph is unfrozen; `p` must be a level-0 fact. Learnt chains are left
    /// untouched, workers skip their satisfied edges by value.
    pub fn remove_true(&mut self, assignment: &Assignment, p: Lit) {
        // Clauses containing p are satisfied. Their entries live in list[¬p] and, as partner
        // entries, in the lists of their other literals.
        let satisfied_bin = std::mem::take(&mut self.graph[(!p).code()].bin);
        for &q in satisfied_bin.iter() {
            self.graph[(!q).code()].bin.retain(|&other| other != p);
            self.bin_problem -= 1;
        }

        let satisfied_tern = std::mem::take(&mut self.graph[(!p).code()].tern);
        for &[q, r] in satisfied_tern.iter() {
            self.graph[(!q).code()]
                .tern
                .retain(|&pair| !pair.contains(&p));
            self.graph[(!r).code()]
                .tern
                .retain(|&pair| !pair.contains(&p));
            self.tern_problem -= 1;
        }

        // Binary clauses containing ¬p became unit, the assignment loop has enqueued their
        // remaining literal. Drop the edges.
        let unit_bin = std::mem::take(&mut self.graph[p.code()].bin);
        for &q in unit_bin.iter() {
            self.graph[(!q).code()].bin.retain(|&other| other != !p);
            self.bin_problem -= 1;
        }

        // Ternary clauses containing ¬p degrade to binary clauses.
        let degraded = std::mem::take(&mut self.graph[p.code()].tern);
        for &[q, r] in degraded.iter() {
            self.graph[(!q).code()]
                .tern
                .retain(|&pair| !pair.contains(&!p));
            self.graph[(!r).code()]
                .tern
                .retain(|&pair| !pair.contains(&!p));
            self.tern_problem -= 1;

            // A satisfied or unit remainder needs no edge, the assignment loop covers it.
            if assignment.lit_value(q).is_none() && assignment.lit_value(r).is_none() {
                self.add_problem(&[q, r]);
            }
        }
    }
}

/// Propagate all literals implied by the given literal via the short-implication graph.
///
/// On conflict returns the binary or ternary clause propagating the conflicting assignment.
pub fn propagate_short(
    mut ctx: partial!(Context, mut AssignmentP, mut ImplGraphP, mut TrailP),
    sig: &ShortImplGraph,
    lit: Lit,
) -> Result<(), Conflict> {
    let list = sig.list(lit);

    for &implied in list.bin.iter() {
        let assignment = ctx.part(AssignmentP);

        if assignment.lit_is_false(implied) {
            return Err(Conflict::Binary([implied, !lit]));
        } else if !assignment.lit_is_true(implied) {
            enqueue_assignment(ctx.borrow(), implied, Reason::Binary([!lit]));
        }
    }

    for &[q, r] in list.tern.iter() {
        propagate_ternary(ctx.borrow(), lit, q, r)?;
    }

    for (q, third) in list.learnt() {
        match third {
            None => {
                let assignment = ctx.part(AssignmentP);
                if assignment.lit_is_false(q) {
                    return Err(Conflict::Binary([q, !lit]));
                } else if !assignment.lit_is_true(q) {
                    enqueue_assignment(ctx.borrow(), q, Reason::Binary([!lit]));
                }
            }
            Some(r) => propagate_ternary(ctx.borrow(), lit, q, r)?,
        }
    }

    Ok(())
}

/// Evaluate the ternary clause `{¬lit, q, r}` under the current assignment.
fn propagate_ternary(
    mut ctx: partial!(Context, mut AssignmentP, mut ImplGraphP, mut TrailP),
    lit: Lit,
    q: Lit,
    r: Lit,
) -> Result<(), Conflict> {
    let assignment = ctx.part(AssignmentP);

    if assignment.lit_is_true(q) || assignment.lit_is_true(r) {
        return Ok(());
    }

    match (assignment.lit_is_false(q), assignment.lit_is_false(r)) {
        (true, true) => Err(Conflict::Ternary([!lit, q, r])),
        (true, false) => {
            enqueue_assignment(ctx.borrow(), r, Reason::Ternary([!lit, q]));
            Ok(())
        }
        (false, true) => {
            enqueue_assignment(ctx.borrow(), q, Reason::Ternary([!lit, r]));
            Ok(())
        }
        (false, false) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    fn lit(l: isize) -> Lit {
        Lit::from_dimacs(l)
    }

    #[test]
    fn edges_are_symmetric() {
        let mut sig = ShortImplGraph::default();
        sig.set_var_count(5);

        sig.add_problem(&[lit(1), lit(-2)]);
        sig.add_problem(&[lit(2), lit(3), lit(-4)]);

        // {1, -2}: -1 implies -2, 2 implies 1.
        assert_eq!(sig.list(lit(-1)).bin, vec![lit(-2)]);
        assert_eq!(sig.list(lit(2)).bin, vec![lit(1)]);

        // {2, 3, -4}: each endpoint sees the remaining pair.
        assert_eq!(sig.list(lit(-2)).tern, vec![[lit(3), lit(-4)]]);
        assert_eq!(sig.list(lit(-3)).tern, vec![[lit(2), lit(-4)]]);
        assert_eq!(sig.list(lit(4)).tern, vec![[lit(2), lit(3)]]);

        assert_eq!(sig.bin_count(), (1, 0));
        assert_eq!(sig.tern_count(), (1, 0));
    }

    #[test]
    fn learnt_edges_are_visible() {
        let mut sig = ShortImplGraph::default();
        sig.set_var_count(4);

        sig.add_learnt(&[lit(1), lit(2)]);
        sig.add_learnt(&[lit(1), lit(3), lit(4)]);

        let from_not_1: Vec<_> = sig.list(lit(-1)).learnt().collect();
        assert!(from_not_1.contains(&(lit(2), None)));
        assert!(from_not_1.contains(&(lit(3), Some(lit(4)))));

        assert_eq!(sig.bin_count(), (0, 1));
        assert_eq!(sig.tern_count(), (0, 1));
    }

    #[test]
    fn concurrent_appends_lose_no_edge() {
        let mut sig = ShortImplGraph::default();
        sig.set_var_count(1000);
        let sig = Arc::new(sig);

        let threads: Vec<_> = (0..4)
            .map(|thread| {
                let sig = Arc::clone(&sig);
                std::thread::spawn(move || {
                    for i in 0..250usize {
                        let var = (thread * 250 + i + 1) as isize;
                        sig.add_learnt(&[lit(1), lit(var.max(2))]);
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(sig.list(lit(-1)).learnt().count(), 1000);
        assert_eq!(sig.bin_count(), (0, 1000));
    }

    #[test]
    fn remove_true_degrades_ternary() {
        let mut sig = ShortImplGraph::default();
        sig.set_var_count(5);
        let mut assignment = Assignment::default();
        assignment.set_var_count(5);

        sig.add_problem(&[lit(1), lit(2)]);
        sig.add_problem(&[lit(-1), lit(3), lit(4)]);

        // 1 becomes a fact: {1, 2} is satisfied, {-1, 3, 4} degrades to {3, 4}.
        assignment.assign_lit(lit(1));
        sig.remove_true(&assignment, lit(1));

        assert_eq!(sig.bin_count().0, 1);
        assert_eq!(sig.tern_count().0, 0);
        assert_eq!(sig.list(lit(-3)).bin, vec![lit(4)]);
        assert_eq!(sig.list(lit(-4)).bin, vec![lit(3)]);
        assert!(sig.list(lit(-1)).is_empty());
        assert!(sig.list(lit(1)).is_empty());
    }
}
