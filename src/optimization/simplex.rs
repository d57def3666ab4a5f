//! Dense two-phase simplex with Bland's rule.
//!
//! Solves `min c'x` subject to mixed `<=` / `==` rows and `x >= 0`. Bland's
//! entering/leaving rule guarantees termination on degenerate programs at the
//! cost of speed, which is acceptable here: the s-rectangular updates solve
//! many small programs rather than one large one. Row duals are recovered
//! from the final basis so callers can read constraint shadow prices.

use std::fmt::Debug;

use num_traits::Float;

use crate::error::{Error, Result};
use crate::optimization::{ConstraintSense, LinearProgram, LpSolution, LpSolver};

const EPSILON: f64 = 1e-9;

/// Pivot cap for a single solve.
#[derive(Debug, Clone, Copy)]
pub struct SimplexConfig {
    pub max_iterations: usize,
}

impl Default for SimplexConfig {
    fn default() -> Self {
        SimplexConfig {
            max_iterations: 10_000,
        }
    }
}

/// The default [`LpSolver`] backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimplexSolver {
    pub config: SimplexConfig,
}

impl LpSolver for SimplexSolver {
    fn solve(&self, lp: &LinearProgram<f64>) -> Result<LpSolution<f64>> {
        minimize(lp, &self.config)
    }
}

struct Tableau<T> {
    /// Fully pivoted constraint rows, one entry per column.
    rows: Vec<Vec<T>>,
    /// Right-hand sides, kept non-negative.
    rhs: Vec<T>,
    /// Basic column of each row.
    basis: Vec<usize>,
    /// Per row: the column whose tableau entries equal `B^-1 e_row`.
    probe: Vec<usize>,
    /// Per row: whether the user row was negated during canonicalization.
    flipped: Vec<bool>,
    /// First artificial column; artificials never re-enter the basis.
    first_artificial: usize,
    columns: usize,
}

/// Minimizes a linear program with the two-phase simplex method.
pub fn minimize<T>(lp: &LinearProgram<T>, config: &SimplexConfig) -> Result<LpSolution<T>>
where
    T: Float + Debug,
{
    let n = lp.objective.len();
    for (i, row) in lp.constraints.iter().enumerate() {
        if row.coefficients.len() != n {
            return Err(Error::ConfigurationError(format!(
                "constraint {} has {} coefficients for {} variables",
                i,
                row.coefficients.len(),
                n
            )));
        }
    }

    let mut tableau = build_tableau(lp);
    let eps = T::from(EPSILON).unwrap();
    let mut iterations = 0;

    // Phase I: drive the artificial variables to zero
    if tableau.first_artificial < tableau.columns {
        let mut costs = vec![T::zero(); tableau.columns];
        for c in costs.iter_mut().skip(tableau.first_artificial) {
            *c = T::one();
        }
        iterations += run(&mut tableau, &costs, config.max_iterations, true)?;
        let infeasibility = objective_value(&tableau, &costs);
        if infeasibility > eps {
            return Err(Error::OptimizationInfeasible(format!(
                "no feasible point (phase-one objective {:?})",
                infeasibility
            )));
        }
        drive_out_artificials(&mut tableau);
    }

    // Phase II: optimize the real objective with artificials barred
    let mut costs = vec![T::zero(); tableau.columns];
    costs[..n].copy_from_slice(&lp.objective);
    iterations += run(&mut tableau, &costs, config.max_iterations, false)?;

    let mut point = vec![T::zero(); n];
    for (row, &basic) in tableau.basis.iter().enumerate() {
        if basic < n {
            point[basic] = tableau.rhs[row];
        }
    }
    let objective = objective_value(&tableau, &costs);
    let duals = extract_duals(&tableau, &costs);

    Ok(LpSolution {
        point,
        objective,
        duals,
        iterations,
    })
}

fn build_tableau<T>(lp: &LinearProgram<T>) -> Tableau<T>
where
    T: Float + Debug,
{
    let n = lp.objective.len();
    let m = lp.constraints.len();

    // every inequality row gets a slack/surplus column; rows whose canonical
    // form lacks a +1 slack also get an artificial
    let num_slack = lp
        .constraints
        .iter()
        .filter(|c| c.sense == ConstraintSense::Le)
        .count();
    let needs_artificial: Vec<bool> = lp
        .constraints
        .iter()
        .map(|c| c.sense == ConstraintSense::Eq || c.rhs < T::zero())
        .collect();
    let num_artificial = needs_artificial.iter().filter(|&&x| x).count();
    let columns = n + num_slack + num_artificial;

    let mut rows = vec![vec![T::zero(); columns]; m];
    let mut rhs = vec![T::zero(); m];
    let mut basis = vec![0usize; m];
    let mut probe = vec![0usize; m];
    let mut flipped = vec![false; m];

    let mut slack_col = n;
    let mut artificial_col = n + num_slack;
    for (i, constraint) in lp.constraints.iter().enumerate() {
        let flip = constraint.rhs < T::zero();
        flipped[i] = flip;
        for (j, &coef) in constraint.coefficients.iter().enumerate() {
            rows[i][j] = if flip { -coef } else { coef };
        }
        rhs[i] = constraint.rhs.abs();

        if constraint.sense == ConstraintSense::Le {
            rows[i][slack_col] = if flip { -T::one() } else { T::one() };
            if !flip {
                basis[i] = slack_col;
                probe[i] = slack_col;
            }
            slack_col += 1;
        }
        if needs_artificial[i] {
            rows[i][artificial_col] = T::one();
            basis[i] = artificial_col;
            probe[i] = artificial_col;
            artificial_col += 1;
        }
    }

    Tableau {
        rows,
        rhs,
        basis,
        probe,
        flipped,
        first_artificial: n + num_slack,
        columns,
    }
}

/// Pivots any artificial variable still basic at zero onto a structural or
/// slack column, so phase two cannot re-grow it. Rows with no such column are
/// redundant and stay inert.
fn drive_out_artificials<T>(tableau: &mut Tableau<T>)
where
    T: Float + Debug,
{
    let eps = T::from(EPSILON).unwrap();
    for i in 0..tableau.rows.len() {
        if tableau.basis[i] < tableau.first_artificial {
            continue;
        }
        let replacement =
            (0..tableau.first_artificial).find(|&j| tableau.rows[i][j].abs() > eps);
        if let Some(j) = replacement {
            pivot(tableau, i, j);
        }
    }
}

/// Runs Bland-rule pivots until optimal. Returns the pivot count.
fn run<T>(
    tableau: &mut Tableau<T>,
    costs: &[T],
    max_iterations: usize,
    allow_artificial: bool,
) -> Result<usize>
where
    T: Float + Debug,
{
    let eps = T::from(EPSILON).unwrap();
    for iteration in 0..max_iterations {
        let entering = (0..tableau.columns)
            .filter(|&j| allow_artificial || j < tableau.first_artificial)
            .find(|&j| reduced_cost(tableau, costs, j) < -eps);
        let entering = match entering {
            Some(j) => j,
            None => return Ok(iteration),
        };

        // minimum ratio test, ties broken by the lowest basic column (Bland)
        let mut leaving: Option<usize> = None;
        let mut best_ratio = T::infinity();
        for i in 0..tableau.rows.len() {
            let coef = tableau.rows[i][entering];
            if coef > eps {
                let ratio = tableau.rhs[i] / coef;
                let better = match leaving {
                    None => true,
                    Some(l) => {
                        ratio < best_ratio - eps
                            || (ratio < best_ratio + eps && tableau.basis[i] < tableau.basis[l])
                    }
                };
                if better {
                    best_ratio = ratio;
                    leaving = Some(i);
                }
            }
        }
        let leaving = match leaving {
            Some(i) => i,
            None => {
                return Err(Error::OptimizationInfeasible(
                    "linear program is unbounded".to_string(),
                ))
            }
        };

        pivot(tableau, leaving, entering);
    }
    Err(Error::OptimizationInfeasible(
        "simplex pivot limit reached".to_string(),
    ))
}

fn reduced_cost<T>(tableau: &Tableau<T>, costs: &[T], column: usize) -> T
where
    T: Float + Debug,
{
    let mut cost = costs[column];
    for (i, row) in tableau.rows.iter().enumerate() {
        cost = cost - costs[tableau.basis[i]] * row[column];
    }
    cost
}

fn objective_value<T>(tableau: &Tableau<T>, costs: &[T]) -> T
where
    T: Float + Debug,
{
    tableau
        .basis
        .iter()
        .zip(tableau.rhs.iter())
        .fold(T::zero(), |acc, (&basic, &b)| acc + costs[basic] * b)
}

fn pivot<T>(tableau: &mut Tableau<T>, leaving: usize, entering: usize)
where
    T: Float + Debug,
{
    let eps = T::from(EPSILON).unwrap();
    let pivot_element = tableau.rows[leaving][entering];
    let scale = T::one() / pivot_element;
    for value in tableau.rows[leaving].iter_mut() {
        *value = *value * scale;
        if value.abs() < eps {
            *value = T::zero();
        }
    }
    tableau.rhs[leaving] = tableau.rhs[leaving] * scale;

    for i in 0..tableau.rows.len() {
        if i == leaving {
            continue;
        }
        let factor = tableau.rows[i][entering];
        if factor.abs() <= eps {
            continue;
        }
        for j in 0..tableau.columns {
            let update = tableau.rows[leaving][j] * factor;
            tableau.rows[i][j] = tableau.rows[i][j] - update;
            if tableau.rows[i][j].abs() < eps {
                tableau.rows[i][j] = T::zero();
            }
        }
        tableau.rhs[i] = tableau.rhs[i] - tableau.rhs[leaving] * factor;
        if tableau.rhs[i].abs() < eps {
            tableau.rhs[i] = T::zero();
        }
    }
    tableau.basis[leaving] = entering;
}

/// Recovers row duals `y = c_B B^-1` from the probe columns, mapped back to
/// the user's row orientation.
fn extract_duals<T>(tableau: &Tableau<T>, costs: &[T]) -> Vec<T>
where
    T: Float + Debug,
{
    (0..tableau.rows.len())
        .map(|k| {
            let column = tableau.probe[k];
            let mut dual = T::zero();
            for (i, row) in tableau.rows.iter().enumerate() {
                dual = dual + costs[tableau.basis[i]] * row[column];
            }
            if tableau.flipped[k] {
                -dual
            } else {
                dual
            }
        })
        .collect()
}
