//! The implication graph.
use parasat_formula::{lit::LitIdx, Lit, Var};

use crate::clause::{ClauseAlloc, ClauseRef, SharedClauseDb, SharedClauseRef};
use crate::cons::{ConstraintRef, Constraints};
use crate::state::SolverState;

/// Assignment that caused a propagation.
///
/// Everything a constraint can be is representable: decisions and facts carry no antecedent,
/// short clauses encode their remaining literals inline, long and shared clauses are referenced
/// by id and external constraints carry a 32-bit payload chosen by the constraint.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Reason {
    Unit,
    Binary([Lit; 1]),
    Ternary([Lit; 2]),
    Long(ClauseRef),
    Shared(SharedClauseRef),
    External(ConstraintRef, u32),
}

impl Reason {
    /// Whether this is a decision, assumption or level-0 fact.
    pub fn is_unit(&self) -> bool {
        matches!(self, Reason::Unit)
    }

    /// The falsified literals that caused the propagation of `lit`.
    ///
    /// The result is appended to `out`. For long clauses the propagated literal is always kept in
    /// position 0, for shared clauses it is filtered by value, and for external constraints the
    /// constraint's `reason` is consulted.
    pub fn append_lits(
        &self,
        alloc: &ClauseAlloc,
        cons: &Constraints,
        shared: &SharedClauseDb,
        lit: Lit,
        out: &mut Vec<Lit>,
    ) {
        match *self {
            Reason::Unit => (),
            Reason::Binary(lits) => out.extend_from_slice(&lits),
            Reason::Ternary(lits) => out.extend_from_slice(&lits),
            Reason::Long(cref) => {
                // The propagated literal is always kept at position 0
                out.extend_from_slice(&alloc.clause(cref).lits()[1..]);
            }
            Reason::Shared(sref) => {
                let slot = shared.slot(sref);
                out.extend(slot.lits.lits().iter().cloned().filter(|&l| l != lit));
            }
            Reason::External(cref, data) => {
                cons.reason(cref, lit, data, out);
            }
        }
    }
}

/// Propagation that resulted in a conflict.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Conflict {
    Binary([Lit; 2]),
    Ternary([Lit; 3]),
    Long(ClauseRef),
    Shared(SharedClauseRef),
    /// Conflict clause recorded in the solver state by a constraint or post-propagator.
    External,
    /// Artificial conflict used to unwind propagation on termination.
    Stop,
}

impl Conflict {
    /// The falsified literals of the conflict.
    ///
    /// The result is appended to `out`. Empty for a stop conflict.
    pub fn append_lits(
        &self,
        alloc: &ClauseAlloc,
        shared: &SharedClauseDb,
        state: &SolverState,
        out: &mut Vec<Lit>,
    ) {
        match *self {
            Conflict::Binary(lits) => out.extend_from_slice(&lits),
            Conflict::Ternary(lits) => out.extend_from_slice(&lits),
            Conflict::Long(cref) => out.extend_from_slice(alloc.clause(cref).lits()),
            Conflict::Shared(sref) => out.extend_from_slice(shared.slot(sref).lits.lits()),
            Conflict::External => out.extend_from_slice(&state.external_conflict),
            Conflict::Stop => (),
        }
    }

    /// Whether this is an artificial stop conflict.
    pub fn is_stop(&self) -> bool {
        matches!(self, Conflict::Stop)
    }
}

/// Node and incoming edges of the implication graph.
#[derive(Copy, Clone)]
pub struct ImplNode {
    pub reason: Reason,
    pub level: LitIdx,
    /// Position on the trail plus one.
    pub depth: LitIdx,
}

/// The implication graph.
///
/// This is a DAG having all assigned variables as nodes. It has unit clauses, guiding-path
/// literals and decisions as sources. For each propagated assignment it has incoming edges from
/// the literals whose assignment caused the propagation to happen.
#[derive(Default)]
pub struct ImplGraph {
    /// Contains only valid data for indices of assigned variables.
    pub nodes: Vec<ImplNode>,
}

impl ImplGraph {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.nodes.resize(
            count,
            ImplNode {
                reason: Reason::Unit,
                level: 0,
                depth: 0,
            },
        );
    }

    /// Get the reason for an assigned variable.
    ///
    /// Returns stale data if the variable isn't assigned.
    pub fn reason(&self, var: Var) -> &Reason {
        &self.nodes[var.index()].reason
    }

    /// Get the decision level of an assigned variable.
    ///
    /// Returns stale data if the variable isn't assigned.
    pub fn level(&self, var: Var) -> usize {
        self.nodes[var.index()].level as usize
    }

    /// Get the trail position of an assigned variable.
    ///
    /// Returns stale data if the variable isn't assigned.
    pub fn depth(&self, var: Var) -> usize {
        self.nodes[var.index()].depth as usize
    }

    /// Updates the reason for an assigned variable.
    ///
    /// Make sure the reason vars are in front of the assigned variable in the trail.
    pub fn update_reason(&mut self, var: Var, reason: Reason) {
        self.nodes[var.index()].reason = reason
    }

    /// Turns the reason for an assigned variable into a level-0 fact.
    pub fn update_removed_unit(&mut self, var: Var) {
        let node = &mut self.nodes[var.index()];
        node.reason = Reason::Unit;
        node.level = 0;
    }
}
