//! Decision heuristics.
use partial_ref::{partial, PartialRef};

use parasat_formula::{Lit, Var};

use crate::context::{parts::*, Context};
use crate::prop::{enqueue_assignment, Reason};

pub mod vsids;

/// Make a decision and enqueue it.
///
/// Picks the unassigned variable with the highest activity and assigns it the polarity given by
/// its preference set, defaulting to negative.
///
/// Returns `false` if no decision was made because all variables are assigned or eliminated.
pub fn make_decision(
    mut ctx: partial!(
        Context,
        mut AssignmentP,
        mut ImplGraphP,
        mut StatsP,
        mut TrailP,
        mut VsidsP,
    ),
) -> bool {
    let decision_var = loop {
        match ctx.part_mut(VsidsP).pop() {
            Some(var) => {
                let assignment = ctx.part(AssignmentP);
                if assignment.var_value(var).is_none() && !assignment.is_eliminated(var) {
                    break var;
                }
            }
            None => return false,
        }
    };

    let polarity = ctx
        .part(AssignmentP)
        .prefs(decision_var)
        .decide()
        .unwrap_or(false);

    let decision = Lit::from_var(decision_var, !polarity);

    ctx.part_mut(TrailP).new_decision_level();
    enqueue_assignment(ctx.borrow(), decision, Reason::Unit);
    ctx.part_mut(StatsP).decisions += 1;

    true
}

/// Re-insert a variable into the decision heuristic after backtracking.
pub fn make_available(mut ctx: partial!(Context, mut VsidsP), var: Var) {
    ctx.part_mut(VsidsP).make_available(var);
}
