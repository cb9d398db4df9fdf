//! Clause activity.
use partial_ref::{partial, PartialRef};

use crate::{
    config::SolverConfig,
    context::{parts::*, Context},
};

use super::ClauseRef;

/// Rescale all clause activities once one of them grows past this value.
const RESCALE_AT: f32 = 1e30;

/// Global state of the clause scoring.
///
/// The per-clause activities live in the clause headers; this tracks the current increment and
/// the decay divisor. Decaying all clauses is folded into growing the increment, which is
/// equivalent up to a factor common to all clauses.
pub struct ClauseActivity {
    /// Base value added to a bumped clause's activity.
    increment: f32,
    /// Divisor applied to the increment on every conflict.
    decay: f32,
}

impl Default for ClauseActivity {
    fn default() -> ClauseActivity {
        ClauseActivity {
            increment: 1.0,
            decay: SolverConfig::default().clause_activity_decay,
        }
    }
}

impl ClauseActivity {
    /// Change the decay factor.
    pub fn set_decay(&mut self, decay: f32) {
        assert!(decay < 1.0);
        assert!(decay > 1.0 / 16.0);
        self.decay = decay;
    }

    /// The increment for a clause with the given glue.
    ///
    /// Lemmas connecting few decision levels are reused far more often than sprawling ones, so
    /// the increment is weighted by the glue: a glue-2 conflict or loop lemma receives twice the
    /// base increment, a high-glue lemma barely more than the base.
    fn weighted(&self, glue: u32) -> f32 {
        self.increment * (1.0 + 2.0 / (glue.max(1) + 1) as f32)
    }
}

/// Increase a clause's activity, weighted by its current glue.
pub fn bump_clause_activity(
    mut ctx: partial!(Context, mut ClauseActivityP, mut ClauseAllocP, mut ClauseDbP),
    cref: ClauseRef,
) {
    let bump = {
        let glue = ctx.part(ClauseAllocP).header(cref).glue();
        ctx.part(ClauseActivityP).weighted(glue)
    };

    let header = ctx.part_mut(ClauseAllocP).header_mut(cref);
    let activity = header.activity() + bump;
    header.set_activity(activity);

    if activity > RESCALE_AT {
        rescale_clause_activities(ctx.borrow());
    }
}

/// Decay the clause activities.
pub fn decay_clause_activities(
    mut ctx: partial!(Context, mut ClauseActivityP, mut ClauseAllocP, mut ClauseDbP),
) {
    let activities = ctx.part_mut(ClauseActivityP);
    activities.increment /= activities.decay;
    if activities.increment > RESCALE_AT {
        rescale_clause_activities(ctx.borrow());
    }
}

/// Scale all activities and the increment down by a common factor.
///
/// Deleted clauses are skipped but stay in the db list; pruning them is the job of reduction and
/// garbage collection.
fn rescale_clause_activities(
    mut ctx: partial!(Context, mut ClauseActivityP, mut ClauseAllocP, mut ClauseDbP),
) {
    let (db, mut ctx) = ctx.split_part_mut(ClauseDbP);
    let (alloc, mut ctx) = ctx.split_part_mut(ClauseAllocP);

    for &cref in db.clauses.iter() {
        let header = alloc.header_mut(cref);
        if !header.deleted() {
            let activity = header.activity() / RESCALE_AT;
            header.set_activity(activity);
        }
    }

    ctx.part_mut(ClauseActivityP).increment /= RESCALE_AT;
}

#[cfg(test)]
mod tests {
    use super::*;

    use partial_ref::IntoPartialRefMut;

    use crate::clause::{db, ClauseHeader, ClauseKind};
    use crate::context::set_var_count;

    fn learnt_clause(
        mut ctx: partial!(Context, mut ClauseAllocP, mut ClauseDbP, mut WatchlistsP),
        glue: u32,
        dimacs: [isize; 4],
    ) -> ClauseRef {
        let mut header = ClauseHeader::new(ClauseKind::Conflict);
        header.set_glue(glue);
        let lits: Vec<_> = dimacs
            .iter()
            .map(|&l| parasat_formula::Lit::from_dimacs(l))
            .collect();
        db::add_clause(ctx.borrow(), header, &lits)
    }

    #[test]
    fn low_glue_clauses_gain_activity_faster() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();
        set_var_count(ctx.borrow(), 8);

        let tight = learnt_clause(ctx.borrow(), 2, [1, 2, 3, 4]);
        let sprawling = learnt_clause(ctx.borrow(), 20, [5, 6, 7, 8]);

        for _ in 0..3 {
            bump_clause_activity(ctx.borrow(), tight);
            bump_clause_activity(ctx.borrow(), sprawling);
        }

        let alloc = ctx.part(ClauseAllocP);
        assert!(alloc.header(tight).activity() > alloc.header(sprawling).activity());
        assert!(alloc.header(sprawling).activity() > 0.0);
    }

    #[test]
    fn rescale_keeps_relative_order() {
        let mut ctx = Context::default();
        let mut ctx = ctx.into_partial_ref_mut();
        set_var_count(ctx.borrow(), 8);

        let hot = learnt_clause(ctx.borrow(), 5, [1, 2, 3, 4]);
        let cold = learnt_clause(ctx.borrow(), 5, [5, 6, 7, 8]);

        bump_clause_activity(ctx.borrow(), cold);

        // Grow the increment past the rescale threshold, then bump again.
        for _ in 0..200_000 {
            decay_clause_activities(ctx.borrow());
        }
        bump_clause_activity(ctx.borrow(), hot);

        let alloc = ctx.part(ClauseAllocP);
        let hot_activity = alloc.header(hot).activity();
        let cold_activity = alloc.header(cold).activity();
        assert!(hot_activity.is_finite() && cold_activity.is_finite());
        assert!(hot_activity > cold_activity);
    }
}
