//! Guiding paths.
//!
//! A guiding path is a sequence of literals asserted as assumptions to restrict a worker to a
//! sub-problem. Path literals are enqueued one per decision level before any regular decision is
//! made. A conflict on a path literal means the worker's sub-problem is exhausted.
//!
//! Splitting carves off the lowest undone decision branch: the negation of the first decision
//! after the path becomes a new guiding path for another worker, while this worker commits to the
//! decision by adopting it into its own path.
use partial_ref::{partial, PartialRef};

use parasat_formula::Lit;

use crate::context::{parts::*, Context};
use crate::prop::{enqueue_assignment, Reason};

/// The guiding path of a worker.
#[derive(Default)]
pub struct GuidingPath {
    lits: Vec<Lit>,
    path_levels: usize,
    /// Whether this path is known not to overlap with any other worker's search region.
    disjoint: bool,
}

impl GuidingPath {
    /// Replace the path.
    ///
    /// Must only be called with no active decisions.
    pub fn set(&mut self, lits: &[Lit], disjoint: bool) {
        self.lits.clear();
        self.lits.extend_from_slice(lits);
        self.path_levels = 0;
        self.disjoint = disjoint;
    }

    /// The literals of the path.
    pub fn lits(&self) -> &[Lit] {
        &self.lits
    }

    /// Number of decision levels currently used by path literals.
    pub fn path_levels(&self) -> usize {
        self.path_levels
    }

    pub fn is_disjoint(&self) -> bool {
        self.disjoint
    }

    pub fn set_disjoint(&mut self, disjoint: bool) {
        self.disjoint = disjoint;
    }

    /// Resets path levels to zero on a full restart.
    pub fn full_restart(&mut self) {
        self.path_levels = 0;
    }
}

/// Return type of [`enqueue_path_lit`].
pub enum EnqueuePath {
    Done,
    Enqueued,
    Conflict,
}

/// Enqueue the next guiding-path literal if any is left.
///
/// Returns whether a literal was enqueued, whether the whole path is established or whether the
/// path is in conflict with the current assignment, i.e. the sub-problem is exhausted.
pub fn enqueue_path_lit(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ImplGraphP,
        mut PathP,
        mut TrailP,
    ),
) -> EnqueuePath {
    while let Some(&lit) = {
        let level = ctx.part(TrailP).current_level();
        ctx.part(PathP).lits.get(level)
    } {
        match ctx.part(AssignmentP).lit_value(lit) {
            Some(false) => return EnqueuePath::Conflict,
            Some(true) => {
                // The literal is already implied, drop it from the path.
                let level = ctx.part(TrailP).current_level();
                ctx.part_mut(PathP).lits.remove(level);
            }
            None => {
                ctx.part_mut(TrailP).new_decision_level();
                enqueue_assignment(ctx.borrow(), lit, Reason::Unit);
                let (path, ctx) = ctx.split_part_mut(PathP);
                path.path_levels = ctx.part(TrailP).current_level();
                return EnqueuePath::Enqueued;
            }
        }
    }
    EnqueuePath::Done
}

/// Whether the worker has an undone decision branch that can be split off.
pub fn splittable(ctx: partial!(Context, PathP, TrailP)) -> bool {
    let path_levels = ctx.part(PathP).path_levels();
    ctx.part(TrailP).current_level() > path_levels
        && ctx.part(TrailP).decision(path_levels + 1).is_some()
}

/// Carve off a new guiding path from the lowest undone decision branch.
///
/// The new path consists of this worker's path literals plus the negation of its first decision.
/// The worker itself commits to the decision by adopting it into its own path. Returns `None`
/// when there is no decision to split.
pub fn split_path(
    mut ctx: partial!(Context, mut PathP, mut StatsP, TrailP),
) -> Option<Vec<Lit>> {
    if !splittable(ctx.borrow()) {
        return None;
    }

    let path_levels = ctx.part(PathP).path_levels();
    let decision = ctx.part(TrailP).decision(path_levels + 1)?;

    let path = ctx.part_mut(PathP);
    let mut new_path = path.lits.clone();
    new_path.push(!decision);

    path.lits.push(decision);
    path.path_levels += 1;

    ctx.part_mut(StatsP).splits += 1;

    Some(new_path)
}
