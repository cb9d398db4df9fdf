//! Learns a new clause by analyzing a conflict.
use std::mem::swap;

use partial_ref::{partial, split_borrow, PartialRef};

use vec_mut_scan::VecMutScan;

use parasat_formula::{Lit, Var};

use crate::clause::{ClauseAlloc, ClauseRef, SharedClauseDb, SharedClauseRef};
use crate::cons::Constraints;
use crate::context::{parts::*, Context};
use crate::prop::{Conflict, Reason};
use crate::sig::ShortImplGraph;

/// Temporaries for conflict analysis
#[derive(Default)]
pub struct AnalyzeConflict {
    /// This is the learned clause after analysis finishes.
    clause: Vec<Lit>,
    /// Number of literals in the current clause at the current level.
    current_level_count: usize,
    /// Variables in the current clause.
    var_flags: Vec<bool>,
    /// Entries to clean in `var_flags`.
    to_clean: Vec<Var>,
    /// Long clauses to bump.
    involved: Vec<ClauseRef>,
    /// Shared clause views whose glue may be lowered.
    involved_shared: Vec<SharedClauseRef>,
    /// Stack for recursive minimization.
    stack: Vec<Lit>,
}

impl AnalyzeConflict {
    /// Update structures for a new variable count.
    pub fn set_var_count(&mut self, count: usize) {
        self.var_flags.resize(count, false);
    }

    /// The learned clause.
    pub fn clause(&self) -> &[Lit] {
        &self.clause
    }

    /// Long clauses involved in the conflict.
    pub fn involved(&self) -> &[ClauseRef] {
        &self.involved
    }

    /// Shared clause views involved in the conflict.
    pub fn involved_shared(&self) -> &[SharedClauseRef] {
        &self.involved_shared
    }
}

/// Learns a new clause by analyzing a conflict.
///
/// Returns the lowest decision level that makes the learned clause asserting. The asserting
/// literal is in position 0, a literal of the backjump level in position 1.
pub fn analyze_conflict(
    mut ctx: partial!(
        Context,
        mut AnalyzeConflictP,
        mut VsidsP,
        AssignmentP,
        ClauseAllocP,
        ConstraintsP,
        ImplGraphP,
        SharedClausesP,
        SolverStateP,
        TrailP,
    ),
    sig: &ShortImplGraph,
    conflict: Conflict,
) -> usize {
    debug_assert!(!conflict.is_stop());

    let (alloc, mut ctx) = ctx.split_part(ClauseAllocP);
    let (cons, mut ctx) = ctx.split_part(ConstraintsP);
    let (shared_db, mut ctx) = ctx.split_part(SharedClausesP);
    let (state, mut ctx) = ctx.split_part(SolverStateP);

    {
        let analyze = ctx.part_mut(AnalyzeConflictP);

        analyze.clause.clear();
        analyze.involved.clear();
        analyze.involved_shared.clear();
        analyze.current_level_count = 0;
    }

    // We start with all the literals of the conflicting clause.
    let mut reason_buf = vec![];
    conflict.append_lits(alloc, shared_db, state, &mut reason_buf);

    if ctx.part(TrailP).current_level() == 0 {
        // Conflict with no decisions, generate the empty clause.
        return 0;
    }

    for &lit in reason_buf.iter() {
        add_literal(ctx.borrow(), lit);
    }

    match conflict {
        Conflict::Long(cref) => ctx.part_mut(AnalyzeConflictP).involved.push(cref),
        Conflict::Shared(sref) => ctx.part_mut(AnalyzeConflictP).involved_shared.push(sref),
        _ => (),
    }

    // To get rid of all but one literal of the current level, we resolve the clause with the
    // reason for those literals. The correct order for this is reverse chronological.

    split_borrow!(ctx_trail = &(TrailP) ctx);

    for &lit in ctx_trail.part(TrailP).trail().iter().rev() {
        let analyze = ctx.part_mut(AnalyzeConflictP);
        let lit_present = &mut analyze.var_flags[lit.index()];
        // Is the lit present in the current clause?
        if *lit_present {
            *lit_present = false;
            analyze.current_level_count -= 1;
            if analyze.current_level_count == 0 {
                // lit is the last literal of the current level present in the current clause,
                // therefore the resulting clause will assert !lit so we put it in position 0.
                analyze.clause.push(!lit);
                let end = analyze.clause.len() - 1;
                analyze.clause.swap(0, end);

                break;
            } else {
                // We removed the literal and now add its reason.
                let reason = *ctx.part(ImplGraphP).reason(lit.var());

                reason_buf.clear();
                reason.append_lits(alloc, cons, shared_db, lit, &mut reason_buf);

                for &reason_lit in reason_buf.iter() {
                    add_literal(ctx.borrow(), reason_lit);
                }

                match reason {
                    Reason::Long(cref) => ctx.part_mut(AnalyzeConflictP).involved.push(cref),
                    Reason::Shared(sref) => {
                        ctx.part_mut(AnalyzeConflictP).involved_shared.push(sref)
                    }
                    _ => (),
                }
            }
        }
    }

    // This needs var_flags set and keeps some var_flags set.
    minimize_clause(ctx.borrow(), alloc, cons, shared_db);

    // Tighten the remaining literals using binary and ternary antecedents below the conflict
    // level. Requires the var_flags of the clause literals, so it runs before the cleanup.
    reverse_arc_tighten(ctx.borrow(), sig);

    let (analyze, mut ctx) = ctx.split_part_mut(AnalyzeConflictP);

    for var in analyze.to_clean.drain(..) {
        analyze.var_flags[var.index()] = false;
    }

    // We find the highest level literal besides the asserted literal and move it into position 1.
    // This is important to ensure the watchlist constraints are not violated on backtracking.
    let mut backtrack_to = 0;

    if analyze.clause.len() > 1 {
        let (prefix, rest) = analyze.clause.split_at_mut(2);
        let lit_1 = &mut prefix[1];
        backtrack_to = ctx.part(ImplGraphP).level(lit_1.var());
        for lit in rest.iter_mut() {
            let lit_level = ctx.part(ImplGraphP).level(lit.var());
            if lit_level > backtrack_to {
                backtrack_to = lit_level;
                swap(lit_1, lit);
            }
        }
    }

    ctx.part_mut(VsidsP).decay();

    backtrack_to
}

/// Add a literal to the current clause.
fn add_literal(
    mut ctx: partial!(Context, mut AnalyzeConflictP, mut VsidsP, ImplGraphP, TrailP),
    lit: Lit,
) {
    let (analyze, mut ctx) = ctx.split_part_mut(AnalyzeConflictP);
    let lit_level = ctx.part(ImplGraphP).level(lit.var());
    // No need to add literals that are set by unit clauses or already present
    if lit_level > 0 && !analyze.var_flags[lit.index()] {
        ctx.part_mut(VsidsP).bump(lit.var());

        analyze.var_flags[lit.index()] = true;
        if lit_level == ctx.part(TrailP).current_level() {
            analyze.current_level_count += 1;
        } else {
            analyze.clause.push(lit);
            analyze.to_clean.push(lit.var());
        }
    }
}

/// A Bloom filter of levels.
#[derive(Default)]
struct LevelAbstraction {
    bits: u64,
}

impl LevelAbstraction {
    /// Add a level to the Bloom filter.
    pub fn add(&mut self, level: usize) {
        self.bits |= 1 << (level % 64)
    }

    /// Test whether a level could be in the Bloom filter.
    pub fn test(&self, level: usize) -> bool {
        self.bits & (1 << (level % 64)) != 0
    }
}

/// Performs recursive clause minimization.
///
/// **Note:** Requires AnalyzeConflict's var_flags to be set for exactly the variables of the
/// unminimized clause. This also sets some more var_flags, but lists them in to_clean.
///
/// This routine tries to remove some redundant literals of the learned clause. The idea is to
/// detect literals of the learned clause that are already implied by other literals of the
/// clause.
///
/// This is done by performing a DFS in the implication graph (following edges in reverse) for
/// each literal apart from the asserting one. The search doesn't expand literals already known to
/// be implied by literals of the clause. When a decision literal that is not in the clause is
/// found, the literal is not redundant.
///
/// There are two optimizations used here: The first one is to stop the search as soon as a
/// literal of a decision level not present in the clause is found. If the DFS would be continued
/// it would at some point reach the decision of that level. That decision belongs to a level not
/// in the clause and thus itself can't be in the clause. Checking whether the decision level is
/// among the clause's decision levels is done approximately using a Bloom filter.
///
/// The other optimization avoids duplicating work between the searches. The var_flags array
/// serves two purposes: it marks the literals of the clause and the literals visited during a
/// DFS. When a search establishes redundancy all its flags are kept, so following searches stop
/// at the known-redundant literals; when it does not, exactly the flags set during that one
/// search are reset.
fn minimize_clause(
    mut ctx: partial!(Context, mut AnalyzeConflictP, ImplGraphP),
    alloc: &ClauseAlloc,
    cons: &Constraints,
    shared_db: &SharedClauseDb,
) {
    let (analyze, ctx) = ctx.split_part_mut(AnalyzeConflictP);
    let impl_graph = ctx.part(ImplGraphP);

    let mut involved_levels = LevelAbstraction::default();

    for &lit in analyze.clause.iter() {
        involved_levels.add(impl_graph.level(lit.var()));
    }

    let var_flags = &mut analyze.var_flags;
    let to_clean = &mut analyze.to_clean;
    let stack = &mut analyze.stack;

    let mut reason_buf = vec![];

    let mut scan = VecMutScan::new(&mut analyze.clause);

    // we always keep the first literal
    scan.next();

    'next_lit: while let Some(lit) = scan.next() {
        if impl_graph.reason(lit.var()).is_unit() {
            continue;
        }

        // Start the DFS
        stack.clear();
        stack.push(!*lit);

        // Used to remember which var_flags are set during this DFS
        let top = to_clean.len();

        while let Some(lit) = stack.pop() {
            let reason = impl_graph.reason(lit.var());

            reason_buf.clear();
            reason.append_lits(alloc, cons, shared_db, lit, &mut reason_buf);

            for &reason_lit in reason_buf.iter() {
                let reason_level = impl_graph.level(reason_lit.var());

                if !var_flags[reason_lit.index()] && reason_level > 0 {
                    // We haven't established reason_lit to be redundant, haven't visited it yet
                    // and it's not implied by unit clauses.

                    if impl_graph.reason(reason_lit.var()).is_unit()
                        || !involved_levels.test(reason_level)
                    {
                        // reason_lit is a decision not in the clause or in a decision level known
                        // not to be in the clause. Abort the search.

                        // Reset the var_flags set during _this_ DFS.
                        for var in to_clean.drain(top..) {
                            var_flags[var.index()] = false;
                        }
                        continue 'next_lit;
                    } else {
                        var_flags[reason_lit.index()] = true;
                        to_clean.push(reason_lit.var());
                        stack.push(!reason_lit);
                    }
                }
            }
        }

        lit.remove();
    }
}

/// Removes literals that have a binary or ternary antecedent within the clause.
///
/// For each non-asserting literal `q` the short-implication graph is searched for an alternative
/// antecedent of `¬q` that uses only literals already in the clause (or level-0 facts) from
/// levels strictly below the conflict level. Such a literal is implied by the rest of the clause
/// and can be dropped.
fn reverse_arc_tighten(
    mut ctx: partial!(Context, mut AnalyzeConflictP, AssignmentP, ImplGraphP, TrailP),
    sig: &ShortImplGraph,
) {
    let (analyze, ctx) = ctx.split_part_mut(AnalyzeConflictP);
    let impl_graph = ctx.part(ImplGraphP);
    let assignment = ctx.part(AssignmentP);
    let conflict_level = ctx.part(TrailP).current_level();

    let var_flags = &analyze.var_flags;

    let mut scan = VecMutScan::new(&mut analyze.clause);

    // the asserting literal stays
    scan.next();

    while let Some(lit) = scan.next() {
        let q = *lit;

        let redundant = sig.reverse_arc(q, &mut |partner: Lit| {
            assignment.lit_is_false(partner)
                && (impl_graph.level(partner.var()) == 0
                    || (var_flags[partner.index()]
                        && impl_graph.level(partner.var()) < conflict_level))
        });

        if redundant {
            lit.remove();
        }
    }
}
