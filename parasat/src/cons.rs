//! The generic constraint contract.
//!
//! Clauses are a closed set of representations dispatched by tag on the hot path. Everything else
//! (loop formulas, minimize constraints, user constraints) implements [`Constraint`] and is
//! registered here. Watches for these constraints form the second, virtual watch layer.
use parasat_formula::{Lit, Var};

use crate::prop::{enqueue_raw, Assignment, ImplGraph, Reason, Trail};

/// Compact reference to a registered constraint.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct ConstraintRef {
    index: u32,
}

impl ConstraintRef {
    pub(crate) fn index(self) -> usize {
        self.index as usize
    }
}

/// Outcome of a constraint propagation.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PropResult {
    /// Keep the watch that triggered the call.
    Keep,
    /// Drop the watch that triggered the call.
    Remove,
    /// A conflict was raised via [`PropContext::raise_conflict`]; the watch is kept.
    Conflict,
}

/// Solver access handed to constraint implementations.
///
/// Restricts a constraint to value queries, enqueuing assignments with itself as the antecedent
/// and raising conflicts.
pub struct PropContext<'a> {
    pub(crate) this: ConstraintRef,
    pub(crate) assignment: &'a mut Assignment,
    pub(crate) trail: &'a mut Trail,
    pub(crate) graph: &'a mut ImplGraph,
    pub(crate) conflict: &'a mut Vec<Lit>,
}

impl<'a> PropContext<'a> {
    pub fn lit_value(&self, lit: Lit) -> Option<bool> {
        self.assignment.lit_value(lit)
    }

    pub fn lit_is_true(&self, lit: Lit) -> bool {
        self.assignment.lit_is_true(lit)
    }

    pub fn lit_is_false(&self, lit: Lit) -> bool {
        self.assignment.lit_is_false(lit)
    }

    pub fn level(&self, var: Var) -> usize {
        self.graph.level(var)
    }

    pub fn current_level(&self) -> usize {
        self.trail.current_level()
    }

    /// Enqueue an assignment with this constraint as the antecedent.
    ///
    /// When the literal is already assigned no assignment is made and the result states whether
    /// the existing assignment agrees.
    pub fn enqueue(&mut self, lit: Lit, data: u32) -> bool {
        match self.assignment.lit_value(lit) {
            Some(value) => value,
            None => {
                enqueue_raw(
                    self.assignment,
                    self.trail,
                    self.graph,
                    lit,
                    Reason::External(self.this, data),
                );
                true
            }
        }
    }

    /// Record a conflict clause. All literals must be false under the current assignment.
    pub fn raise_conflict(&mut self, lits: &[Lit]) {
        debug_assert!(lits.iter().all(|&lit| self.assignment.lit_is_false(lit)));
        self.conflict.clear();
        self.conflict.extend_from_slice(lits);
    }
}

/// A constraint outside the built-in clause representations.
pub trait Constraint: Send {
    /// Invoked when the watched literal `p` became true.
    ///
    /// `data` is the payload stored with the watch.
    fn propagate(&mut self, ctx: &mut PropContext<'_>, p: Lit, data: u32) -> PropResult;

    /// Fill `out` with the literals whose falsity implies `p`.
    fn reason(&self, p: Lit, data: u32, out: &mut Vec<Lit>);

    /// Whether `p`, propagated by this constraint, is redundant in a learnt clause.
    ///
    /// `is_redundant` reports redundancy of an individual reason literal.
    fn minimize(&self, p: Lit, data: u32, is_redundant: &mut dyn FnMut(Lit) -> bool) -> bool {
        let mut lits = Vec::new();
        self.reason(p, data, &mut lits);
        lits.into_iter().all(|lit| is_redundant(lit))
    }

    /// Level-0 simplification. Returning `true` destroys the constraint.
    fn simplify(&mut self, assignment: &Assignment) -> bool {
        let _ = assignment;
        false
    }

    /// Duplicate this constraint for another worker, `None` opts out of cloning.
    fn clone_constraint(&self) -> Option<Box<dyn Constraint>> {
        None
    }
}

/// A short clause enforced through the virtual constraint layer.
///
/// Used for clauses that must not enter the shared short-implication graph, e.g. enumerator
/// blocking clauses whose lifetime is bound to a single run. The constraint watches the
/// negations of all its literals.
pub struct ClauseConstraint {
    lits: Vec<Lit>,
}

impl ClauseConstraint {
    pub fn new(lits: &[Lit]) -> ClauseConstraint {
        ClauseConstraint {
            lits: lits.to_vec(),
        }
    }

    pub fn lits(&self) -> &[Lit] {
        &self.lits
    }
}

impl Constraint for ClauseConstraint {
    fn propagate(&mut self, ctx: &mut PropContext<'_>, _p: Lit, _data: u32) -> PropResult {
        let mut unassigned = None;

        for &lit in self.lits.iter() {
            match ctx.lit_value(lit) {
                Some(true) => return PropResult::Keep,
                Some(false) => (),
                None => {
                    if unassigned.is_some() {
                        // Two free literals, nothing to propagate yet.
                        return PropResult::Keep;
                    }
                    unassigned = Some(lit);
                }
            }
        }

        match unassigned {
            Some(lit) => {
                ctx.enqueue(lit, 0);
                PropResult::Keep
            }
            None => {
                let lits = self.lits.clone();
                ctx.raise_conflict(&lits);
                PropResult::Conflict
            }
        }
    }

    fn reason(&self, p: Lit, _data: u32, out: &mut Vec<Lit>) {
        out.extend(self.lits.iter().cloned().filter(|&lit| lit != p));
    }

    fn simplify(&mut self, assignment: &Assignment) -> bool {
        self.lits.iter().any(|&lit| assignment.lit_is_true(lit))
    }

    fn clone_constraint(&self) -> Option<Box<dyn Constraint>> {
        Some(Box::new(ClauseConstraint {
            lits: self.lits.clone(),
        }))
    }
}

/// Registry of generic constraints.
///
/// A constraint that requests destruction mid-search is only tombstoned; the slot is swept at the
/// next level-0 simplification, after the trail cannot reference it as an antecedent anymore.
#[derive(Default)]
pub struct Constraints {
    slots: Vec<Option<Box<dyn Constraint>>>,
    dead: Vec<u32>,
}

impl Constraints {
    /// Register a constraint.
    pub fn add(&mut self, constraint: Box<dyn Constraint>) -> ConstraintRef {
        let index = self.slots.len() as u32;
        self.slots.push(Some(constraint));
        ConstraintRef { index }
    }

    /// Number of registered live constraints.
    pub fn count(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Fill `out` with the reason of `p` under the given constraint.
    pub fn reason(&self, cref: ConstraintRef, p: Lit, data: u32, out: &mut Vec<Lit>) {
        self.slots[cref.index()]
            .as_ref()
            .expect("reason of destroyed constraint")
            .reason(p, data, out);
    }

    /// Redundancy check for recursive minimization.
    pub fn minimize(
        &self,
        cref: ConstraintRef,
        p: Lit,
        data: u32,
        is_redundant: &mut dyn FnMut(Lit) -> bool,
    ) -> bool {
        match self.slots[cref.index()].as_ref() {
            Some(constraint) => constraint.minimize(p, data, is_redundant),
            None => false,
        }
    }

    /// Temporarily remove a constraint for a virtual call.
    pub(crate) fn take(&mut self, cref: ConstraintRef) -> Option<Box<dyn Constraint>> {
        self.slots[cref.index()].take()
    }

    pub(crate) fn untake(&mut self, cref: ConstraintRef, constraint: Box<dyn Constraint>) {
        debug_assert!(self.slots[cref.index()].is_none());
        self.slots[cref.index()] = Some(constraint);
    }

    /// Schedule a constraint for destruction at the next sweep.
    pub fn schedule_destroy(&mut self, cref: ConstraintRef) {
        self.dead.push(cref.index);
    }

    /// Drop all constraints scheduled for destruction.
    ///
    /// Must only be called at level 0, when no trail entry can have a scheduled constraint as its
    /// antecedent.
    pub fn sweep(&mut self) {
        for index in self.dead.drain(..) {
            self.slots[index as usize] = None;
        }
    }

    /// Level-0 simplification of all constraints.
    pub fn simplify(&mut self, assignment: &Assignment) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(constraint) = slot {
                if constraint.simplify(assignment) {
                    self.dead.push(index as u32);
                }
            }
        }
        self.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCons {
        lits: Vec<Lit>,
    }

    impl Constraint for FakeCons {
        fn propagate(&mut self, _ctx: &mut PropContext<'_>, _p: Lit, _data: u32) -> PropResult {
            PropResult::Keep
        }

        fn reason(&self, p: Lit, _data: u32, out: &mut Vec<Lit>) {
            out.extend(self.lits.iter().filter(|&&l| l != p));
        }
    }

    #[test]
    fn tombstoned_slots_survive_until_sweep() {
        let mut cons = Constraints::default();
        let lits: Vec<Lit> = [1, -2, 3].iter().map(|&l| Lit::from_dimacs(l)).collect();
        let cref = cons.add(Box::new(FakeCons { lits: lits.clone() }));
        assert_eq!(cons.count(), 1);

        cons.schedule_destroy(cref);
        // Still queryable before the sweep.
        let mut out = vec![];
        cons.reason(cref, lits[0], 0, &mut out);
        assert_eq!(out, &lits[1..]);

        cons.sweep();
        assert_eq!(cons.count(), 0);
    }
}
