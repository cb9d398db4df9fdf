//! The VSIDS branching heuristic.
//!
//! VSIDS (Variable State Independent Decaying Sum) keeps an activity value per variable. On every
//! conflict the variables involved in the analysis are bumped by a constant and the activities of
//! all variables decay by a constant factor below one. Decisions branch on the unassigned
//! variable with the highest activity.
use parasat_formula::Var;

use crate::config::SolverConfig;

/// Rescale all activities once one of them grows past this value.
const RESCALE_AT: f64 = 1e100;

/// The VSIDS branching heuristic.
///
/// Activities are kept in a max-heap of variables with a separate position table, so bumping a
/// variable can restore the heap property from its current position. Decaying all activities is
/// replaced by growing the bump increment; both only ever change activities by a factor common
/// to all variables, which cancels out in comparisons. When the increment would overflow, every
/// activity and the increment are scaled down together.
///
/// The heap is laid out 1-based: position 0 of the spine is a sentinel, a position of 0 in the
/// table means the variable is currently not enqueued.
pub struct Vsids {
    /// The activity of each variable.
    activity: Vec<f64>,
    /// Heap spine of enqueued variables, entry 0 is a sentinel.
    spine: Vec<Var>,
    /// Heap position of each variable, 0 when not enqueued.
    position: Vec<usize>,
    /// The value added to a bumped variable's activity.
    increment: f64,
    /// Divisor applied to the increment on every decay.
    decay: f64,
}

impl Default for Vsids {
    fn default() -> Vsids {
        Vsids {
            activity: vec![],
            spine: vec![Var::from_index(0)],
            position: vec![],
            increment: 1.0,
            decay: SolverConfig::default().vsids_decay as f64,
        }
    }
}

impl Vsids {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        let old_count = self.activity.len();
        self.activity.resize(count, 0.0);
        self.position.resize(count, 0);

        for index in old_count..count {
            self.make_available(Var::from_index(index));
        }
    }

    /// Change the decay factor.
    pub fn set_decay(&mut self, decay: f32) {
        assert!(decay < 1.0);
        assert!(decay > 1.0 / 16.0);
        self.decay = decay as f64;
    }

    /// Number of currently enqueued variables.
    pub fn len(&self) -> usize {
        self.spine.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a variable is currently enqueued.
    pub fn contains(&self, var: Var) -> bool {
        self.position[var.index()] != 0
    }

    /// Bump a variable by increasing its activity.
    pub fn bump(&mut self, var: Var) {
        self.activity[var.index()] += self.increment;
        if self.activity[var.index()] > RESCALE_AT {
            self.rescale();
        }

        let pos = self.position[var.index()];
        if pos != 0 {
            self.percolate_up(pos);
        }
    }

    /// Decay all variable activities.
    pub fn decay(&mut self) {
        self.increment /= self.decay;
        if self.increment > RESCALE_AT {
            self.rescale();
        }
    }

    /// Scale everything down by a common factor to avoid overflow.
    fn rescale(&mut self) {
        for activity in self.activity.iter_mut() {
            *activity /= RESCALE_AT;
        }
        self.increment /= RESCALE_AT;
    }

    /// Insert a variable into the heap if not already present.
    pub fn make_available(&mut self, var: Var) {
        if self.position[var.index()] == 0 {
            self.spine.push(var);
            let pos = self.spine.len() - 1;
            self.position[var.index()] = pos;
            self.percolate_up(pos);
        }
    }

    /// Remove and return the variable with the highest activity.
    pub fn pop(&mut self) -> Option<Var> {
        if self.is_empty() {
            return None;
        }

        let top = self.spine[1];
        self.position[top.index()] = 0;

        let last = self.spine.pop().unwrap();
        if !self.is_empty() {
            self.spine[1] = last;
            self.position[last.index()] = 1;
            self.percolate_down(1);
        }

        Some(top)
    }

    /// Move the variable at `pos` towards the root until its parent is at least as active.
    ///
    /// The entry travels as a hole that parents drop into, and is only written once at its final
    /// position.
    fn percolate_up(&mut self, mut pos: usize) {
        let var = self.spine[pos];
        let activity = self.activity[var.index()];

        while pos > 1 {
            let parent_pos = pos / 2;
            let parent = self.spine[parent_pos];
            if self.activity[parent.index()] >= activity {
                break;
            }
            self.spine[pos] = parent;
            self.position[parent.index()] = pos;
            pos = parent_pos;
        }

        self.spine[pos] = var;
        self.position[var.index()] = pos;
    }

    /// Move the variable at `pos` towards the leaves until both children are at most as active.
    fn percolate_down(&mut self, mut pos: usize) {
        let var = self.spine[pos];
        let activity = self.activity[var.index()];
        let len = self.spine.len();

        loop {
            let mut child_pos = pos * 2;
            if child_pos >= len {
                break;
            }
            let right_pos = child_pos + 1;
            if right_pos < len
                && self.activity[self.spine[right_pos].index()]
                    > self.activity[self.spine[child_pos].index()]
            {
                child_pos = right_pos;
            }

            let child = self.spine[child_pos];
            if activity >= self.activity[child.index()] {
                break;
            }
            self.spine[pos] = child;
            self.position[child.index()] = pos;
            pos = child_pos;
        }

        self.spine[pos] = var;
        self.position[var.index()] = pos;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(index: usize) -> Var {
        Var::from_index(index)
    }

    #[test]
    fn pops_by_descending_activity() {
        let mut vsids = Vsids::default();
        vsids.set_var_count(5);

        // 3 > 0 > 4 > 1 = 2 by bump count.
        for _ in 0..4 {
            vsids.bump(var(3));
        }
        for _ in 0..3 {
            vsids.bump(var(0));
        }
        vsids.bump(var(4));
        vsids.bump(var(4));

        assert_eq!(vsids.pop(), Some(var(3)));
        assert_eq!(vsids.pop(), Some(var(0)));
        assert_eq!(vsids.pop(), Some(var(4)));

        let rest = [vsids.pop().unwrap(), vsids.pop().unwrap()];
        assert!(rest.contains(&var(1)));
        assert!(rest.contains(&var(2)));
        assert_eq!(vsids.pop(), None);
    }

    #[test]
    fn reinsert_is_idempotent_and_bumps_move_entries() {
        let mut vsids = Vsids::default();
        vsids.set_var_count(4);

        while vsids.pop().is_some() {}

        vsids.make_available(var(2));
        vsids.make_available(var(2));
        assert_eq!(vsids.len(), 1);
        assert!(vsids.contains(var(2)));
        assert!(!vsids.contains(var(0)));

        vsids.make_available(var(0));
        vsids.bump(var(0));
        assert_eq!(vsids.pop(), Some(var(0)));
        assert_eq!(vsids.pop(), Some(var(2)));
        assert_eq!(vsids.pop(), None);
    }

    #[test]
    fn decay_prefers_recent_bumps() {
        let mut vsids = Vsids::default();
        vsids.set_var_count(2);
        vsids.set_decay(0.5);

        // Var 0 is bumped often, but long ago; var 1 once, after many decays.
        for _ in 0..4 {
            vsids.bump(var(0));
        }
        for _ in 0..10 {
            vsids.decay();
        }
        vsids.bump(var(1));

        assert_eq!(vsids.pop(), Some(var(1)));
        assert_eq!(vsids.pop(), Some(var(0)));
    }

    #[test]
    fn rescale_preserves_order() {
        let mut vsids = Vsids::default();
        vsids.set_var_count(3);
        vsids.set_decay(1.0 / 8.0);

        vsids.bump(var(1));

        // Push the increment over the rescale threshold.
        for _ in 0..150 {
            vsids.decay();
        }
        vsids.bump(var(2));

        assert!(vsids.increment.is_finite());
        assert!(vsids.activity.iter().all(|a| a.is_finite()));
        assert_eq!(vsids.pop(), Some(var(2)));
        assert_eq!(vsids.pop(), Some(var(1)));
        assert_eq!(vsids.pop(), Some(var(0)));
    }
}
