//! End-to-end solving scenarios.
use proptest::prelude::*;

use parasat::{
    ParallelSolver, RestartConfig, SolveMode, SolveResult, SolverConfig,
};
use parasat_formula::test::{pigeon_hole_formula, sat_formula, sgen_unsat_formula};
use parasat_formula::{CnfFormula, Lit};

fn lits(dimacs: &[isize]) -> Vec<Lit> {
    dimacs.iter().map(|&l| Lit::from_dimacs(l)).collect()
}

fn solver_for(formula: &CnfFormula, config: SolverConfig) -> ParallelSolver {
    let mut solver = ParallelSolver::new(config);
    solver.add_formula(formula).unwrap();
    solver.end_init().unwrap();
    solver
}

#[test]
fn empty_problem_is_sat() {
    let mut solver = ParallelSolver::default();
    solver.end_init().unwrap();
    assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Sat);
}

#[test]
fn pigeon_hole_three_into_two_is_unsat() {
    let formula = pigeon_hole_formula(2);
    let mut solver = solver_for(&formula, SolverConfig::default());
    assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Unsat);
    assert!(solver.models().is_empty());
}

#[test]
fn single_solution_chain() {
    // a, a -> b, b -> c forces the unique model {a, b, c}.
    let mut solver = ParallelSolver::default();
    solver.add_vars(3).unwrap();
    solver.start_add_constraints().unwrap();
    solver.add_clause(&lits(&[1])).unwrap();
    solver.add_clause(&lits(&[-1, 2])).unwrap();
    solver.add_clause(&lits(&[-2, 3])).unwrap();
    solver.end_init().unwrap();

    assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Sat);
    let models = solver.models();
    assert_eq!(models.len(), 1);
    for lit in lits(&[1, 2, 3]) {
        assert!(models[0].contains(&lit));
    }
}

#[test]
fn single_solution_iterator_is_exhausted_after_one_model() {
    let config = SolverConfig {
        max_models: None,
        ..SolverConfig::default()
    };
    let mut solver = ParallelSolver::new(config);
    solver.add_vars(3).unwrap();
    solver.start_add_constraints().unwrap();
    solver.add_clause(&lits(&[1])).unwrap();
    solver.add_clause(&lits(&[-1, 2])).unwrap();
    solver.add_clause(&lits(&[-2, 3])).unwrap();

    let mut iter = solver.start_solve(&[]).unwrap();
    let first = iter.next().expect("one model expected");
    assert!(first.contains(&Lit::from_dimacs(3)));
    assert_eq!(iter.next(), None);
}

#[test]
fn enumerates_all_models_of_free_variables() {
    // Two unconstrained variables have four models.
    let config = SolverConfig {
        max_models: Some(4),
        ..SolverConfig::default()
    };
    let mut solver = ParallelSolver::new(config);
    solver.add_vars(2).unwrap();
    solver.start_add_constraints().unwrap();
    solver.end_init().unwrap();

    assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Sat);

    let mut models = solver.models();
    assert_eq!(models.len(), 4);

    models.iter_mut().for_each(|model| model.sort());
    models.sort();
    models.dedup();
    assert_eq!(models.len(), 4, "models must be pairwise distinct");
}

#[test]
fn guiding_path_restricts_models() {
    let config = SolverConfig {
        max_models: Some(4),
        ..SolverConfig::default()
    };
    let mut solver = ParallelSolver::new(config);
    solver.add_vars(2).unwrap();
    solver.start_add_constraints().unwrap();
    solver.end_init().unwrap();

    // Under the path [-1] only the two models with ¬a remain.
    assert_eq!(solver.solve(&lits(&[-1])).unwrap(), SolveResult::Sat);
    let models = solver.models();
    assert_eq!(models.len(), 2);
    for model in models {
        assert!(model.contains(&Lit::from_dimacs(-1)));
    }
}

#[test]
fn parallel_split_finds_both_independent_models() {
    // Two independent sub-problems, each with exactly one model.
    let config = SolverConfig {
        threads: Some(2),
        mode: SolveMode::Split,
        max_models: Some(4),
        ..SolverConfig::default()
    };
    let mut solver = ParallelSolver::new(config);
    solver.add_vars(2).unwrap();
    solver.start_add_constraints().unwrap();
    solver.add_clause(&lits(&[1, 2])).unwrap();
    solver.add_clause(&lits(&[-1, -2])).unwrap();
    solver.end_init().unwrap();

    assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Sat);

    let mut models = solver.models();
    models.iter_mut().for_each(|model| model.sort());
    models.sort();
    models.dedup();
    assert_eq!(models.len(), 2);
}

#[test]
fn parallel_portfolio_solves_unsat() {
    let formula = pigeon_hole_formula(3);
    let config = SolverConfig {
        threads: Some(2),
        ..SolverConfig::default()
    };
    let mut solver = solver_for(&formula, config);
    assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Unsat);
}

#[test]
fn dynamic_restarts_fire_with_the_default_config() {
    // The default configuration uses glue-based dynamic restarts (window 50, K = 0.8). A
    // pigeonhole instance of this size degrades the glue averages enough that the trigger must
    // fire within the run.
    let formula = pigeon_hole_formula(5);
    let mut solver = solver_for(&formula, SolverConfig::default());
    assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Unsat);

    let stats = solver.stats();
    assert!(stats.conflicts > 50, "too easy to fill the glue window");
    assert!(
        stats.restarts + stats.blocked_restarts >= 1,
        "the dynamic restart trigger never fired"
    );
}

#[test]
fn restarts_happen_on_hard_instances() {
    let formula = pigeon_hole_formula(4);
    let config = SolverConfig {
        restart: RestartConfig::Luby { scale: 16 },
        block_restart: None,
        ..SolverConfig::default()
    };
    let mut solver = solver_for(&formula, config);
    assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Unsat);
    assert!(solver.stats().conflicts > 16);
    assert!(solver.stats().restarts >= 1);
}

#[test]
fn conflict_budget_reports_exhausted() {
    let formula = pigeon_hole_formula(6);
    let config = SolverConfig {
        conflict_limit: Some(10),
        ..SolverConfig::default()
    };
    let mut solver = solver_for(&formula, config);
    assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Exhausted);
}

#[test]
fn interrupt_yields_unknown_interrupted() {
    // A pigeonhole instance large enough to keep the workers busy.
    let formula = pigeon_hole_formula(9);
    let mut solver = solver_for(&formula, SolverConfig::default());
    let interrupter = solver.interrupter();

    let run = std::thread::spawn(move || solver.solve(&[]).unwrap());

    std::thread::sleep(std::time::Duration::from_millis(10));
    interrupter.interrupt();

    assert_eq!(run.join().unwrap(), SolveResult::Interrupted);
}

#[test]
fn incremental_steps_refine_the_problem() {
    let mut solver = ParallelSolver::default();
    solver.add_vars(2).unwrap();
    solver.start_add_constraints().unwrap();
    solver.add_clause(&lits(&[1, 2])).unwrap();
    solver.end_init().unwrap();

    assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Sat);

    // Adding while frozen is a logic error; after unfreezing it is fine.
    assert!(solver.add_clause(&lits(&[-1])).is_err());
    solver.unfreeze().unwrap();
    solver.add_clause(&lits(&[-1])).unwrap();
    solver.add_clause(&lits(&[-2])).unwrap();
    solver.end_init().unwrap();

    assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Unsat);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn sgen_unsat(formula in sgen_unsat_formula(1..4usize)) {
        let mut solver = solver_for(&formula, SolverConfig::default());
        prop_assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Unsat);
    }

    #[test]
    fn sat_models_satisfy_the_formula(
        formula in sat_formula(4..20usize, 10..100usize, 0.05..0.2, 0.9..1.0),
    ) {
        let mut solver = solver_for(&formula, SolverConfig::default());
        prop_assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Sat);

        let models = solver.models();
        prop_assert_eq!(models.len(), 1);
        for clause in formula.iter() {
            prop_assert!(clause.iter().any(|lit| models[0].contains(lit)));
        }
    }

    #[test]
    fn parallel_compete_agrees_with_sequential(
        formula in sat_formula(4..15usize, 10..60usize, 0.05..0.2, 0.9..1.0),
    ) {
        let config = SolverConfig {
            threads: Some(3),
            ..SolverConfig::default()
        };
        let mut solver = solver_for(&formula, config);
        prop_assert_eq!(solver.solve(&[]).unwrap(), SolveResult::Sat);
    }
}
