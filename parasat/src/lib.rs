//! A parallel CDCL SAT/ASP solving core.
//!
//! The crate provides the conflict-driven solving machinery of an answer-set / SAT engine:
//! watched-literal propagation with a specialized short-implication graph, conflict analysis
//! with recursive minimization, activity and glue based learnt-clause management, static and
//! dynamic restart strategies and a portfolio / guiding-path coordinator that multiplexes a
//! shared frozen problem over cooperating workers with lemma exchange.
//!
//! Front ends feed constraints through [`ParallelSolver`]'s builder surface (or directly through
//! [`shared::SharedContext`]); theory reasoning plugs in through the [`cons::Constraint`] and
//! [`post::PostPropagator`] contracts.
#[macro_use]
extern crate parasat_formula;

pub mod clause;
pub mod config;
pub mod cons;
pub mod dist;
pub mod enumerate;
pub mod errors;
pub mod load;
pub mod parallel;
pub mod post;
pub mod prop;
pub mod restart;
pub mod search;
pub mod shared;
pub mod sig;
pub mod solver;
pub mod state;
pub mod stats;
pub mod vars;

mod analyze;
mod context;
mod decision;
mod glue;
mod path;
mod simplify;
mod tmp;

pub use parasat_formula::{CnfFormula, Lit, Var};

pub use config::{
    BlockConfig, DistributorKind, IntegrationConfig, RestartConfig, SolveMode, SolverConfig,
    Topology,
};
pub use enumerate::Model;
pub use errors::{CoreError, SolveResult};
pub use parallel::{Interrupter, ModelIter, ParallelSolver};
pub use solver::{Solver, SolverCore};
pub use stats::SolverStats;
