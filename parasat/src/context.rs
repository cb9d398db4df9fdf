//! Central solver data structure.
//!
//! This module defines the `Context` data structure which holds all per-worker data used by the
//! solver. It also contains global notification functions that likely need to be extended when
//! new parts are added to the solver.
use partial_ref::{part, partial, PartialRef, PartialRefTarget};

use crate::analyze::AnalyzeConflict;
use crate::clause::{ClauseActivity, ClauseAlloc, ClauseDb, SharedClauseDb};
use crate::config::SolverConfig;
use crate::cons::Constraints;
use crate::path::GuidingPath;
use crate::prop::{Assignment, ImplGraph, Trail, Watchlists};
use crate::restart::Schedule;
use crate::state::SolverState;
use crate::stats::SolverStats;
use crate::tmp::TmpData;
use crate::decision::vsids::Vsids;

/// Part declarations for the [`Context`] struct.
pub mod parts {
    use super::*;

    part!(pub AnalyzeConflictP: AnalyzeConflict);
    part!(pub AssignmentP: Assignment);
    part!(pub ClauseActivityP: ClauseActivity);
    part!(pub ClauseAllocP: ClauseAlloc);
    part!(pub ClauseDbP: ClauseDb);
    part!(pub ConstraintsP: Constraints);
    part!(pub ImplGraphP: ImplGraph);
    part!(pub PathP: GuidingPath);
    part!(pub ScheduleP: Schedule);
    part!(pub SharedClausesP: SharedClauseDb);
    part!(pub SolverConfigP: SolverConfig);
    part!(pub SolverStateP: SolverState);
    part!(pub StatsP: SolverStats);
    part!(pub TmpDataP: TmpData);
    part!(pub TrailP: Trail);
    part!(pub VsidsP: Vsids);
    part!(pub WatchlistsP: Watchlists);
}

use parts::*;

/// Central solver data structure.
///
/// This struct contains all data kept by one worker. Most functions operating on multiple fields
/// of the context use partial references provided by the `partial_ref` crate. This documents the
/// data dependencies and makes the borrow checker happy without the overhead of passing individual
/// references.
#[derive(PartialRefTarget, Default)]
pub struct Context {
    #[part(AnalyzeConflictP)]
    pub analyze_conflict: AnalyzeConflict,
    #[part(AssignmentP)]
    pub assignment: Assignment,
    #[part(ClauseActivityP)]
    pub clause_activity: ClauseActivity,
    #[part(ClauseAllocP)]
    pub clause_alloc: ClauseAlloc,
    #[part(ClauseDbP)]
    pub clause_db: ClauseDb,
    #[part(ConstraintsP)]
    pub constraints: Constraints,
    #[part(ImplGraphP)]
    pub impl_graph: ImplGraph,
    #[part(PathP)]
    pub path: GuidingPath,
    #[part(ScheduleP)]
    pub schedule: Schedule,
    #[part(SharedClausesP)]
    pub shared_clauses: SharedClauseDb,
    #[part(SolverConfigP)]
    pub solver_config: SolverConfig,
    #[part(SolverStateP)]
    pub solver_state: SolverState,
    #[part(StatsP)]
    pub stats: SolverStats,
    #[part(TmpDataP)]
    pub tmp_data: TmpData,
    #[part(TrailP)]
    pub trail: Trail,
    #[part(VsidsP)]
    pub vsids: Vsids,
    #[part(WatchlistsP)]
    pub watchlists: Watchlists,
}

/// Update structures for a new variable count.
pub fn set_var_count(
    mut ctx: partial!(
        Context,
        mut AnalyzeConflictP,
        mut AssignmentP,
        mut ImplGraphP,
        mut TmpDataP,
        mut VsidsP,
        mut WatchlistsP,
    ),
    count: usize,
) {
    ctx.part_mut(AnalyzeConflictP).set_var_count(count);
    ctx.part_mut(AssignmentP).set_var_count(count);
    ctx.part_mut(ImplGraphP).set_var_count(count);
    ctx.part_mut(TmpDataP).set_var_count(count);
    ctx.part_mut(VsidsP).set_var_count(count);
    ctx.part_mut(WatchlistsP).set_var_count(count);
}

/// Apply the configuration to all parts caching configuration values.
pub fn config_changed(
    mut ctx: partial!(Context, mut ClauseActivityP, mut ScheduleP, mut VsidsP, SolverConfigP),
) {
    let (config, mut ctx) = ctx.split_part(SolverConfigP);
    ctx.part_mut(VsidsP).set_decay(config.vsids_decay);
    ctx.part_mut(ClauseActivityP)
        .set_decay(config.clause_activity_decay);
    ctx.part_mut(ScheduleP).configure(config);
}
