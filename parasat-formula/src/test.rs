//! Formula generators for tests.
use proptest::{prelude::*, *};

use rand::distributions::Bernoulli;
use rand::seq::SliceRandom;

use crate::cnf::CnfFormula;
use crate::lit::Lit;

/// Generate small hard unsat instances.
///
/// Sgen-style instances (http://www.cs.qub.ac.uk/~i.spence/sgen/) with random partitions.
pub fn sgen_unsat_formula(
    blocks: impl Strategy<Value = usize>,
) -> impl Strategy<Value = CnfFormula> {
    blocks.prop_flat_map(|blocks| {
        collection::vec(bool::ANY, blocks * 4 + 1).prop_perturb(|negate, mut rng| {
            let mut clauses: Vec<Vec<Lit>> = vec![];
            let mut lits = negate
                .into_iter()
                .enumerate()
                .map(|(index, negate)| Lit::from_index(index, negate))
                .collect::<Vec<_>>();

            for &invert in [false, true].iter() {
                lits.shuffle(&mut rng);
                for block in lits.chunks_exact(4) {
                    for a in 0..4 {
                        for b in 0..a {
                            for c in 0..b {
                                let mut clause =
                                    vec![block[a] ^ invert, block[b] ^ invert, block[c] ^ invert];
                                clause.shuffle(&mut rng);
                                clauses.push(clause);
                            }
                        }
                    }
                }
                let &lit_a = lits.last().unwrap();
                for b in 0..4 {
                    for c in 0..b {
                        let mut clause = vec![lit_a ^ invert, lits[b] ^ invert, lits[c] ^ invert];
                        clause.shuffle(&mut rng);
                        clauses.push(clause);
                    }
                }
            }

            clauses.shuffle(&mut rng);
            CnfFormula::from(clauses)
        })
    })
}

/// Generate a sat instance.
///
/// This generates a random full assignment and then only generates clauses compatible with that
/// assignment.
pub fn sat_formula(
    vars: impl Strategy<Value = usize>,
    clause_count: impl Strategy<Value = usize>,
    density: impl Strategy<Value = f64>,
    polarity_dist: impl Strategy<Value = f64>,
) -> impl Strategy<Value = CnfFormula> {
    (vars, clause_count, density, polarity_dist).prop_flat_map(
        |(vars, clause_count, density, polarity_dist)| {
            let density = Bernoulli::new(density).unwrap();
            let polarity_dist = Bernoulli::new(polarity_dist).unwrap();

            collection::vec(bool::ANY, vars).prop_perturb(move |negate, mut rng| {
                let mut clauses: Vec<Vec<Lit>> = vec![];
                let lits = negate
                    .into_iter()
                    .enumerate()
                    .map(|(index, negate)| Lit::from_index(index, negate))
                    .collect::<Vec<_>>();

                for _ in 0..clause_count {
                    let &fixed_lit = lits.choose(&mut rng).unwrap();
                    let mut clause = vec![fixed_lit];
                    for &lit in lits.iter() {
                        if lit != fixed_lit && rng.sample(density) {
                            clause.push(lit ^ rng.sample(polarity_dist));
                        }
                    }
                    clause.shuffle(&mut rng);
                    clauses.push(clause);
                }

                clauses.shuffle(&mut rng);
                CnfFormula::from(clauses)
            })
        },
    )
}

/// The pigeonhole principle for `holes + 1` pigeons and `holes` holes.
///
/// Variable `p_{i,j}` (pigeon `i` sits in hole `j`) has index `i * holes + j`. Unsatisfiable for
/// every `holes >= 1`.
pub fn pigeon_hole_formula(holes: usize) -> CnfFormula {
    let pigeons = holes + 1;
    let mut formula = CnfFormula::new();

    for i in 0..pigeons {
        let clause: Vec<Lit> = (0..holes)
            .map(|j| Lit::from_index(i * holes + j, false))
            .collect();
        formula.add_clause(clause);
    }

    for j in 0..holes {
        for i in 0..pigeons {
            for k in 0..i {
                formula.add_clause(
                    [
                        Lit::from_index(i * holes + j, true),
                        Lit::from_index(k * holes + j, true),
                    ]
                    .iter()
                    .cloned(),
                );
            }
        }
    }

    formula
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pigeon_hole_shape() {
        let formula = pigeon_hole_formula(2);
        assert_eq!(formula.var_count(), 6);
        // 3 pigeon clauses + 2 holes * 3 pairs
        assert_eq!(formula.len(), 3 + 2 * 3);
    }
}
