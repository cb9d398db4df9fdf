//! The shared problem context.
//!
//! A [`SharedContext`] carries the frozen problem all workers solve: variable metadata, the
//! short-implication graph, the long problem clauses as shared literal arrays and the optional
//! distributor for lemma exchange. Constraints can only be added while the context is unfrozen;
//! `end_init` freezes it, after which it is distributed to the workers behind an `Arc`. The
//! transition is one-way per incremental step, `unfreeze` requires exclusive access again.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;

use parasat_formula::{Lit, Var};

use crate::clause::{ClauseKind, SharedLits};
use crate::dist::Distribute;
use crate::errors::CoreError;
use crate::prop::Assignment;
use crate::sig::ShortImplGraph;
use crate::vars::{VarFlags, VarKind, Vars};

/// The frozen problem shared by all workers.
pub struct SharedContext {
    vars: Vars,
    sig: ShortImplGraph,
    clauses: Vec<SharedLits>,
    facts: Vec<Lit>,
    unsat: bool,
    frozen: AtomicBool,
    concurrency: usize,
    distributor: Option<Arc<dyn Distribute>>,
}

impl Default for SharedContext {
    fn default() -> SharedContext {
        SharedContext {
            vars: Vars::default(),
            sig: ShortImplGraph::default(),
            clauses: vec![],
            facts: vec![],
            unsat: false,
            frozen: AtomicBool::new(false),
            concurrency: 1,
            distributor: None,
        }
    }
}

impl SharedContext {
    pub fn new() -> SharedContext {
        SharedContext::default()
    }

    /// Number of problem variables.
    pub fn var_count(&self) -> usize {
        self.vars.count()
    }

    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub fn vars_mut(&mut self) -> &mut Vars {
        &mut self.vars
    }

    pub fn sig(&self) -> &ShortImplGraph {
        &self.sig
    }

    /// Long problem clauses.
    pub fn clauses(&self) -> &[SharedLits] {
        &self.clauses
    }

    /// Level-0 facts of the problem.
    pub fn facts(&self) -> &[Lit] {
        &self.facts
    }

    /// Whether loading derived unsatisfiability.
    pub fn is_unsat(&self) -> bool {
        self.unsat
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Number of workers this context is prepared for.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn distributor(&self) -> Option<&Arc<dyn Distribute>> {
        self.distributor.as_ref()
    }

    /// Prepare the context for the given number of workers.
    ///
    /// Must be called before freezing.
    pub fn set_concurrency(&mut self, concurrency: usize) {
        debug_assert!(!self.is_frozen());
        self.concurrency = concurrency.max(1);
    }

    pub fn set_distributor(&mut self, distributor: Option<Arc<dyn Distribute>>) {
        debug_assert!(!self.is_frozen());
        self.distributor = distributor;
    }

    fn ensure_unfrozen(&self) -> Result<(), CoreError> {
        if self.is_frozen() {
            CoreError::logic("constraint added to a frozen problem")
        } else {
            Ok(())
        }
    }

    /// Add fresh variables and return the first one.
    pub fn add_vars(
        &mut self,
        count: usize,
        kind: VarKind,
        flags: VarFlags,
    ) -> Result<Var, CoreError> {
        self.ensure_unfrozen()?;
        let first = self.vars.add_vars(count, kind, flags);
        self.sig.set_var_count(self.vars.count());
        Ok(first)
    }

    /// Start the constraint-adding phase of the current step.
    pub fn start_add_constraints(&mut self) -> Result<(), CoreError> {
        self.ensure_unfrozen()?;
        self.sig.set_var_count(self.vars.count());
        Ok(())
    }

    /// Add a problem clause.
    ///
    /// Duplicate literals are removed and tautological clauses are ignored. Unit clauses become
    /// facts, binary and ternary clauses go into the short-implication graph, everything longer
    /// is stored as a shared literal array.
    pub fn add_clause(&mut self, lits: &[Lit]) -> Result<(), CoreError> {
        self.ensure_unfrozen()?;

        let mut lits = lits.to_vec();
        lits.sort_unstable();
        lits.dedup();

        // Detect tautological clauses
        let mut last = None;
        for &lit in lits.iter() {
            if last == Some(!lit) {
                return Ok(());
            }
            last = Some(lit);
        }

        for &lit in lits.iter() {
            if lit.index() >= self.vars.count() {
                return CoreError::logic("clause over undeclared variable");
            }
        }

        match lits[..] {
            [] => self.unsat = true,
            [lit] => self.facts.push(lit),
            [_, _] | [_, _, _] => self.sig.add_problem(&lits),
            _ => self
                .clauses
                .push(SharedLits::new(&lits, ClauseKind::Problem, 0)),
        }

        Ok(())
    }

    /// Freeze the problem for this step.
    ///
    /// Performs the level-0 simplification of the short-implication graph and the long clauses
    /// before the one-way transition to the frozen state.
    pub fn end_init(&mut self) -> Result<(), CoreError> {
        self.ensure_unfrozen()?;

        self.simplify_level0();

        info!(
            "frozen problem: {} vars, {} facts, {} bin, {} tern, {} long clauses{}",
            self.vars.count(),
            self.facts.len(),
            self.sig.bin_count().0,
            self.sig.tern_count().0,
            self.clauses.len(),
            if self.unsat { " (unsat)" } else { "" },
        );

        self.frozen.store(true, Ordering::Release);
        Ok(())
    }

    /// Re-open the context for another incremental step.
    ///
    /// The caller must guarantee that no worker is attached anymore, which is why this requires
    /// exclusive access.
    pub fn unfreeze(&mut self) {
        self.frozen.store(false, Ordering::Release);
    }

    /// Propagate the collected facts through the problem clauses.
    ///
    /// Satisfied clauses are removed, ternary clauses with a false literal degrade to binary
    /// edges and shrunken long clauses are re-dispatched.
    fn simplify_level0(&mut self) {
        let mut assignment = Assignment::default();
        assignment.set_var_count(self.vars.count());

        // Saturate the facts through the short-implication graph.
        let mut queue: Vec<Lit> = vec![];
        let mut pending = std::mem::take(&mut self.facts);

        while let Some(fact) = pending.pop() {
            if assignment.lit_is_true(fact) {
                continue;
            }
            if assignment.lit_is_false(fact) {
                self.unsat = true;
                self.facts.clear();
                return;
            }
            assignment.assign_lit(fact);
            queue.push(fact);

            let list = self.sig.list(fact);
            for &implied in list.bin.iter() {
                if !assignment.lit_is_true(implied) {
                    pending.push(implied);
                }
            }
            for &[q, r] in list.tern.iter() {
                if assignment.lit_is_true(q) || assignment.lit_is_true(r) {
                    continue;
                }
                match (assignment.lit_is_false(q), assignment.lit_is_false(r)) {
                    (true, true) => {
                        self.unsat = true;
                        self.facts.clear();
                        return;
                    }
                    (true, false) => pending.push(r),
                    (false, true) => pending.push(q),
                    (false, false) => (),
                }
            }
        }

        self.facts = queue;
        self.facts.sort_unstable();

        for &fact in self.facts.clone().iter() {
            self.sig.remove_true(&assignment, fact);
        }

        // Re-dispatch long clauses under the fact assignment.
        let clauses = std::mem::take(&mut self.clauses);
        for slits in clauses {
            let lits = slits.lits();
            if lits.iter().any(|&lit| assignment.lit_is_true(lit)) {
                continue;
            }
            let remaining: Vec<Lit> = lits
                .iter()
                .cloned()
                .filter(|&lit| !assignment.lit_is_false(lit))
                .collect();
            match remaining[..] {
                [] => self.unsat = true,
                [lit] => {
                    if !assignment.lit_is_true(lit) {
                        assignment.assign_lit(lit);
                        self.facts.push(lit);
                    }
                }
                [_, _] | [_, _, _] => self.sig.add_problem(&remaining),
                _ => {
                    if remaining.len() < lits.len() {
                        self.clauses
                            .push(SharedLits::new(&remaining, ClauseKind::Problem, 0));
                    } else {
                        self.clauses.push(slits);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lits(dimacs: &[isize]) -> Vec<Lit> {
        dimacs.iter().map(|&l| Lit::from_dimacs(l)).collect()
    }

    #[test]
    fn freeze_rejects_further_clauses() {
        let mut shared = SharedContext::new();
        shared
            .add_vars(4, VarKind::Hybrid, VarFlags::INPUT)
            .unwrap();
        shared.start_add_constraints().unwrap();
        shared.add_clause(&lits(&[1, 2])).unwrap();
        shared.end_init().unwrap();

        assert!(shared.is_frozen());
        assert!(matches!(
            shared.add_clause(&lits(&[3, 4])),
            Err(CoreError::Logic(_))
        ));

        shared.unfreeze();
        assert!(shared.add_clause(&lits(&[3, 4])).is_ok());
    }

    #[test]
    fn clause_dispatch() {
        let mut shared = SharedContext::new();
        shared
            .add_vars(6, VarKind::Hybrid, VarFlags::INPUT)
            .unwrap();
        shared.start_add_constraints().unwrap();

        shared.add_clause(&lits(&[1])).unwrap();
        shared.add_clause(&lits(&[2, 3])).unwrap();
        shared.add_clause(&lits(&[2, 3, 4])).unwrap();
        shared.add_clause(&lits(&[2, -2, 5])).unwrap(); // tautology
        shared.add_clause(&lits(&[2, 3, 4, 5, 6])).unwrap();

        assert_eq!(shared.facts(), &lits(&[1])[..]);
        assert_eq!(shared.sig().bin_count().0, 1);
        assert_eq!(shared.sig().tern_count().0, 1);
        assert_eq!(shared.clauses().len(), 1);
    }

    #[test]
    fn level0_simplification_degrades_clauses() {
        let mut shared = SharedContext::new();
        shared
            .add_vars(5, VarKind::Hybrid, VarFlags::INPUT)
            .unwrap();
        shared.start_add_constraints().unwrap();

        shared.add_clause(&lits(&[1])).unwrap();
        shared.add_clause(&lits(&[-1, 2, 3, 4])).unwrap();
        shared.add_clause(&lits(&[1, 4, 5])).unwrap(); // satisfied by the fact
        shared.end_init().unwrap();

        assert!(!shared.is_unsat());
        // {-1, 2, 3, 4} shrank to the ternary {2, 3, 4}.
        assert_eq!(shared.clauses().len(), 0);
        assert_eq!(shared.sig().tern_count().0, 1);

        let mut shared = SharedContext::new();
        shared
            .add_vars(2, VarKind::Hybrid, VarFlags::INPUT)
            .unwrap();
        shared.start_add_constraints().unwrap();
        shared.add_clause(&lits(&[1])).unwrap();
        shared.add_clause(&lits(&[-1])).unwrap();
        shared.end_init().unwrap();
        assert!(shared.is_unsat());
    }
}
