//! Partial assignment and backtracking.
use partial_ref::{partial, PartialRef};

use parasat_formula::{lit::LitIdx, Lit, Var};

use crate::context::{parts::*, Context};
use crate::decision::make_available;

use super::graph::{ImplGraph, Reason};

/// Prioritized preferred values of a variable.
///
/// A compact byte with four two-bit fields. When a decision selects a polarity the layers are
/// consulted from highest to lowest priority: user > saved > preferred > default.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct ValueSet(u8);

impl ValueSet {
    const USER: u32 = 6;
    const SAVED: u32 = 4;
    const PREFERRED: u32 = 2;
    const DEFAULT: u32 = 0;

    fn get(self, shift: u32) -> Option<bool> {
        match (self.0 >> shift) & 0b11 {
            0b01 => Some(true),
            0b10 => Some(false),
            _ => None,
        }
    }

    fn set(&mut self, shift: u32, value: Option<bool>) {
        let bits = match value {
            Some(true) => 0b01,
            Some(false) => 0b10,
            None => 0b00,
        };
        self.0 = (self.0 & !(0b11 << shift)) | (bits << shift);
    }

    pub fn user(self) -> Option<bool> {
        self.get(Self::USER)
    }

    pub fn set_user(&mut self, value: Option<bool>) {
        self.set(Self::USER, value)
    }

    pub fn saved(self) -> Option<bool> {
        self.get(Self::SAVED)
    }

    pub fn set_saved(&mut self, value: Option<bool>) {
        self.set(Self::SAVED, value)
    }

    pub fn preferred(self) -> Option<bool> {
        self.get(Self::PREFERRED)
    }

    pub fn set_preferred(&mut self, value: Option<bool>) {
        self.set(Self::PREFERRED, value)
    }

    pub fn default_value(self) -> Option<bool> {
        self.get(Self::DEFAULT)
    }

    pub fn set_default(&mut self, value: Option<bool>) {
        self.set(Self::DEFAULT, value)
    }

    /// The polarity a decision on this variable should use.
    pub fn decide(self) -> Option<bool> {
        self.user()
            .or_else(|| self.saved())
            .or_else(|| self.preferred())
            .or_else(|| self.default_value())
    }
}

/// Current partial assignment.
#[derive(Default)]
pub struct Assignment {
    assignment: Vec<Option<bool>>,
    prefs: Vec<ValueSet>,
    eliminated: Vec<bool>,
}

/// This compares two `Option<bool>` values as bytes. Workaround for bad code generation.
fn fast_option_eq(a: Option<bool>, b: Option<bool>) -> bool {
    unsafe { std::mem::transmute::<_, u8>(a) == std::mem::transmute::<_, u8>(b) }
}

impl Assignment {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.assignment.resize(count, None);
        self.prefs.resize(count, ValueSet::default());
        self.eliminated.resize(count, false);
    }

    /// Current partial assignment as slice.
    pub fn assignment(&self) -> &[Option<bool>] {
        &self.assignment
    }

    /// Value assigned to a variable.
    pub fn var_value(&self, var: Var) -> Option<bool> {
        self.assignment[var.index()]
    }

    /// Value assigned to a literal.
    pub fn lit_value(&self, lit: Lit) -> Option<bool> {
        self.assignment[lit.index()].map(|b| b ^ lit.is_negative())
    }

    pub fn lit_is_true(&self, lit: Lit) -> bool {
        fast_option_eq(self.assignment[lit.index()], Some(lit.is_positive()))
    }

    pub fn lit_is_false(&self, lit: Lit) -> bool {
        fast_option_eq(self.assignment[lit.index()], Some(lit.is_negative()))
    }

    pub fn lit_is_unk(&self, lit: Lit) -> bool {
        fast_option_eq(self.assignment[lit.index()], None)
    }

    pub fn assign_lit(&mut self, lit: Lit) {
        self.assignment[lit.index()] = lit.is_positive().into()
    }

    /// The preferred values of a variable.
    pub fn prefs(&self, var: Var) -> ValueSet {
        self.prefs[var.index()]
    }

    pub fn prefs_mut(&mut self, var: Var) -> &mut ValueSet {
        &mut self.prefs[var.index()]
    }

    /// Exclude a variable from the active assignment.
    ///
    /// Fails if the variable is currently assigned.
    pub fn eliminate(&mut self, var: Var) -> bool {
        if self.assignment[var.index()].is_some() {
            return false;
        }
        self.eliminated[var.index()] = true;
        true
    }

    pub fn is_eliminated(&self, var: Var) -> bool {
        self.eliminated[var.index()]
    }
}

/// Decision and propagation history.
#[derive(Default)]
pub struct Trail {
    /// Stack of all propagated and all enqueued assignments
    trail: Vec<Lit>,
    /// Next assignment in trail to propagate
    queue_head_pos: usize,
    /// Decision levels as trail indices.
    decisions: Vec<LitIdx>,
    /// Number of unit clauses removed from the trail.
    units_removed: usize,
}

impl Trail {
    /// Return the next assigned literal to propagate.
    pub fn queue_head(&self) -> Option<Lit> {
        self.trail.get(self.queue_head_pos).cloned()
    }

    /// Return the next assigned literal to propagate and remove it from the queue.
    pub fn pop_queue(&mut self) -> Option<Lit> {
        let head = self.queue_head();
        if head.is_some() {
            self.queue_head_pos += 1;
        }
        head
    }

    /// Re-enqueue all assigned literals.
    pub fn reset_queue(&mut self) {
        self.queue_head_pos = 0;
    }

    /// Skip all unpropagated assignments.
    ///
    /// Used when a stop conflict aborts propagation.
    pub fn abort_queue(&mut self) {
        self.queue_head_pos = self.trail.len();
    }

    /// Assigned literals in assignment order.
    pub fn trail(&self) -> &[Lit] {
        &self.trail
    }

    /// Clear the trail.
    ///
    /// This simply removes all entries without performing any backtracking. Can only be called
    /// with no active decisions.
    pub fn clear(&mut self) {
        assert!(self.decisions.is_empty());
        self.units_removed += self.trail.len();
        self.trail.clear();
        self.queue_head_pos = 0;
    }

    /// Start a new decision level.
    ///
    /// Does not enqueue the decision itself.
    pub fn new_decision_level(&mut self) {
        self.decisions.push(self.trail.len() as LitIdx)
    }

    /// Current decision level.
    pub fn current_level(&self) -> usize {
        self.decisions.len()
    }

    /// Trail index at which the given decision level started.
    pub fn level_start(&self, level: usize) -> usize {
        if level == 0 {
            0
        } else {
            self.decisions[level - 1] as usize
        }
    }

    /// The decision literal of a level, if the level is non-empty.
    pub fn decision(&self, level: usize) -> Option<Lit> {
        debug_assert!(level > 0);
        self.trail.get(self.decisions[level - 1] as usize).cloned()
    }

    /// The number of assignments at level 0.
    pub fn top_level_assignment_count(&self) -> usize {
        self.decisions
            .get(0)
            .map(|&len| len as usize)
            .unwrap_or(self.trail.len())
            + self.units_removed
    }

    /// Whether all assignments are processed.
    pub fn fully_propagated(&self) -> bool {
        self.queue_head_pos == self.trail.len()
    }
}

/// Enqueue an assignment without a [`Context`] at hand.
///
/// Shared between [`enqueue_assignment`] and the restricted solver views handed to constraints
/// and post-propagators. The literal has to be unassigned when calling this.
pub fn enqueue_raw(
    assignment: &mut Assignment,
    trail: &mut Trail,
    graph: &mut ImplGraph,
    lit: Lit,
    reason: Reason,
) {
    debug_assert!(assignment.lit_value(lit) == None);
    debug_assert!(!assignment.is_eliminated(lit.var()));

    assignment.assign_lit(lit);
    trail.trail.push(lit);

    let node = &mut graph.nodes[lit.index()];
    node.reason = reason;
    node.level = trail.decisions.len() as LitIdx;
    node.depth = trail.trail.len() as LitIdx;
}

/// Enqueues the assignment of true to a literal.
///
/// This updates the assignment and trail, but does not perform any propagation. The literal has to
/// be unassigned when calling this.
pub fn enqueue_assignment(
    mut ctx: partial!(Context, mut AssignmentP, mut ImplGraphP, mut TrailP),
    lit: Lit,
    reason: Reason,
) {
    let (assignment, mut ctx) = ctx.split_part_mut(AssignmentP);
    let (trail, mut ctx) = ctx.split_part_mut(TrailP);
    let graph = ctx.part_mut(ImplGraphP);

    enqueue_raw(assignment, trail, graph, lit, reason);
}

/// Undo all assignments in decision levels deeper than the given level.
///
/// The current value of every undone variable is stored in the saved-value slot of its
/// preference set (phase saving).
pub fn backtrack(
    mut ctx: partial!(Context, mut AssignmentP, mut TrailP, mut VsidsP),
    level: usize,
) {
    let (assignment, mut ctx) = ctx.split_part_mut(AssignmentP);
    let (trail, mut ctx) = ctx.split_part_mut(TrailP);

    if level == trail.decisions.len() {
        return;
    }

    let new_trail_len = trail.decisions[level] as usize;

    trail.queue_head_pos = new_trail_len;
    trail.decisions.truncate(level);

    let trail_end = &trail.trail[new_trail_len..];
    for &lit in trail_end {
        make_available(ctx.borrow(), lit.var());
        let var_assignment = &mut assignment.assignment[lit.index()];
        assignment.prefs[lit.index()].set_saved(*var_assignment);
        *var_assignment = None;
    }
    trail.trail.truncate(new_trail_len);
}

/// Undo all decisions including the guiding path.
pub fn full_restart(
    mut ctx: partial!(Context, mut AssignmentP, mut PathP, mut TrailP, mut VsidsP),
) {
    ctx.part_mut(PathP).full_restart();
    backtrack(ctx.borrow(), 0);
}

/// Undo all decisions, keeping the guiding path.
pub fn restart(
    mut ctx: partial!(Context, mut AssignmentP, mut TrailP, mut VsidsP, PathP),
) {
    let level = ctx
        .part(PathP)
        .path_levels()
        .min(ctx.part(TrailP).current_level());
    backtrack(ctx.borrow(), level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_set_priorities() {
        let mut prefs = ValueSet::default();
        assert_eq!(prefs.decide(), None);

        prefs.set_default(Some(false));
        assert_eq!(prefs.decide(), Some(false));

        prefs.set_preferred(Some(true));
        assert_eq!(prefs.decide(), Some(true));

        prefs.set_saved(Some(false));
        assert_eq!(prefs.decide(), Some(false));

        prefs.set_user(Some(true));
        assert_eq!(prefs.decide(), Some(true));

        prefs.set_user(None);
        assert_eq!(prefs.decide(), Some(false));
        assert_eq!(prefs.preferred(), Some(true));
        assert_eq!(prefs.default_value(), Some(false));
    }

    #[test]
    fn eliminate_requires_unassigned() {
        let mut assignment = Assignment::default();
        assignment.set_var_count(2);

        assignment.assign_lit(Lit::from_dimacs(1));
        assert!(!assignment.eliminate(Var::from_dimacs(1)));
        assert!(assignment.eliminate(Var::from_dimacs(2)));
        assert!(assignment.is_eliminated(Var::from_dimacs(2)));
    }

    #[test]
    fn backtrack_saves_phases() {
        use partial_ref::IntoPartialRefMut;

        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();
        crate::context::set_var_count(ctx.borrow(), 2);

        ctx.part_mut(TrailP).new_decision_level();
        enqueue_assignment(ctx.borrow(), Lit::from_dimacs(1), Reason::Unit);
        enqueue_assignment(
            ctx.borrow(),
            Lit::from_dimacs(-2),
            Reason::Binary([Lit::from_dimacs(-1)]),
        );

        assert_eq!(ctx.part(TrailP).trail().len(), 2);

        backtrack(ctx.borrow(), 0);

        let assignment = ctx.part(AssignmentP);
        assert_eq!(assignment.var_value(Var::from_dimacs(1)), None);
        assert_eq!(assignment.prefs(Var::from_dimacs(1)).saved(), Some(true));
        assert_eq!(assignment.prefs(Var::from_dimacs(2)).saved(), Some(false));
        assert_eq!(ctx.part(TrailP).current_level(), 0);
    }
}
