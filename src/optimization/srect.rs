//! The s-rectangular joint Bellman optimizer.
//!
//! When the ambiguity budget is shared across all actions of a state, the
//! per-action closed forms are invalid: nature's deviations are coupled
//! through a single budget and the decision maker's policy is itself a
//! distribution over actions. The max-min problem
//!
//! ```text
//! max_{d} min_{p}  sum_a d_a * z_a' p_a
//! s.t. 1'd = 1, d >= 0
//!      sum_a ||p_a - pbar_a||_{norm,w_a} <= kappa
//!      1'p_a = 1, p_a >= 0
//! ```
//!
//! is solved through the dual of the inner minimization, which turns the
//! bilinear max-min into one linear program over the dual variables
//! `x_a` (free), `y^p, y^n >= 0` per (action, successor), `lambda >= 0`, and
//! the policy `d`:
//!
//! ```text
//! max  sum_a x_a + sum_{a,i} pbar_ai (y^n_ai - y^p_ai) - kappa * lambda
//! s.t. x_a - y^p_ai + y^n_ai <= d_a z_ai          for every (a, i)
//!      y^p_ai + y^n_ai <= lambda * w_ai            (L1 geometry, per (a, i))
//!      sum_i (y^p_ai + y^n_ai) <= lambda           (Linf geometry, per a)
//!      1'd = 1, d >= 0
//! ```

use crate::error::{Error, Result};
use crate::model::EPSILON;
use crate::nature::NatureModel;
use crate::optimization::{Constraint, ConstraintSense, LinearProgram, LpSolver};

/// Result of one s-rectangular update.
#[derive(Debug, Clone, PartialEq)]
pub struct SrectOutcome {
    /// The robust state value.
    pub objective: f64,
    /// The (generally randomized) policy over the state's actions.
    pub policy: Vec<f64>,
    /// Diagnostic: how the shared budget was allocated across actions at the
    /// optimum, read off the duals of the norm constraints.
    pub budgets: Vec<f64>,
}

/// Solves one s-rectangular state update.
///
/// `z[a]` are the successor returns of action `a` and `pbar[a]` its nominal
/// probabilities, both over the action's own (sparse) successor list.
/// Passing `policy_eval` pins the policy `d` instead of optimizing it, which
/// is the policy-evaluation variant. Weights apply to the L1 geometry only;
/// the L∞ geometry treats all deviations uniformly.
pub fn solve(
    solver: &dyn LpSolver,
    model: NatureModel,
    z: &[Vec<f64>],
    pbar: &[Vec<f64>],
    kappa: f64,
    weights: Option<&[Vec<f64>]>,
    policy_eval: Option<&[f64]>,
) -> Result<SrectOutcome> {
    validate(z, pbar, kappa, weights, policy_eval)?;

    let num_actions = z.len();
    let counts: Vec<usize> = pbar.iter().map(|p| p.len()).collect();
    let total: usize = counts.iter().sum();

    // column layout: x+ | x- | y^p | y^n | lambda | d
    let xp = 0;
    let xn = num_actions;
    let yp = 2 * num_actions;
    let yn = 2 * num_actions + total;
    let lambda = 2 * num_actions + 2 * total;
    let d = lambda + 1;
    let columns = d + num_actions;

    // the solver minimizes, so the LP maximization objective is negated
    let mut objective = vec![0.0; columns];
    for a in 0..num_actions {
        objective[xp + a] = -1.0;
        objective[xn + a] = 1.0;
    }
    let mut g = 0;
    for a in 0..num_actions {
        for i in 0..counts[a] {
            objective[yp + g] = pbar[a][i];
            objective[yn + g] = -pbar[a][i];
            g += 1;
        }
    }
    objective[lambda] = kappa;

    let mut constraints = Vec::with_capacity(2 * total + num_actions);

    // duals of the inner problem's distribution variables
    let mut g = 0;
    for a in 0..num_actions {
        for i in 0..counts[a] {
            let mut row = vec![0.0; columns];
            row[xp + a] = 1.0;
            row[xn + a] = -1.0;
            row[yp + g] = -1.0;
            row[yn + g] = 1.0;
            row[d + a] = -z[a][i];
            constraints.push(Constraint {
                coefficients: row,
                sense: ConstraintSense::Le,
                rhs: 0.0,
            });
            g += 1;
        }
    }

    // norm constraints; their duals are the realized deviations
    let norm_rows_start = constraints.len();
    match model {
        NatureModel::L1 => {
            let mut g = 0;
            for a in 0..num_actions {
                for i in 0..counts[a] {
                    let weight = weights.map_or(1.0, |w| w[a][i]);
                    let mut row = vec![0.0; columns];
                    row[yp + g] = 1.0;
                    row[yn + g] = 1.0;
                    row[lambda] = -weight;
                    constraints.push(Constraint {
                        coefficients: row,
                        sense: ConstraintSense::Le,
                        rhs: 0.0,
                    });
                    g += 1;
                }
            }
        }
        NatureModel::Linf => {
            let mut g = 0;
            for a in 0..num_actions {
                let mut row = vec![0.0; columns];
                for _ in 0..counts[a] {
                    row[yp + g] = 1.0;
                    row[yn + g] = 1.0;
                    g += 1;
                }
                row[lambda] = -1.0;
                constraints.push(Constraint {
                    coefficients: row,
                    sense: ConstraintSense::Le,
                    rhs: 0.0,
                });
            }
        }
    }

    // the policy is either optimized on the simplex or pinned
    match policy_eval {
        Some(pinned) => {
            for (a, &value) in pinned.iter().enumerate() {
                let mut row = vec![0.0; columns];
                row[d + a] = 1.0;
                constraints.push(Constraint {
                    coefficients: row,
                    sense: ConstraintSense::Eq,
                    rhs: value,
                });
            }
        }
        None => {
            let mut row = vec![0.0; columns];
            for a in 0..num_actions {
                row[d + a] = 1.0;
            }
            constraints.push(Constraint {
                coefficients: row,
                sense: ConstraintSense::Eq,
                rhs: 1.0,
            });
        }
    }

    let solution = solver.solve(&LinearProgram {
        objective,
        constraints,
    })?;

    let mut policy: Vec<f64> = (0..num_actions)
        .map(|a| solution.point[d + a].max(0.0))
        .collect();
    let mass: f64 = policy.iter().sum();
    if mass > 0.0 {
        for p in &mut policy {
            *p /= mass;
        }
    }

    // deviation magnitudes come out as non-positive duals of the <= rows
    let theta =
        |row: usize| -> f64 { (-solution.duals[norm_rows_start + row]).max(0.0) };
    let budgets: Vec<f64> = match model {
        NatureModel::L1 => {
            let mut g = 0;
            (0..num_actions)
                .map(|a| {
                    let mut used = 0.0;
                    for i in 0..counts[a] {
                        let weight = weights.map_or(1.0, |w| w[a][i]);
                        used += weight * theta(g);
                        g += 1;
                    }
                    used
                })
                .collect()
        }
        NatureModel::Linf => (0..num_actions).map(theta).collect(),
    };

    Ok(SrectOutcome {
        objective: -solution.objective,
        policy,
        budgets,
    })
}

fn validate(
    z: &[Vec<f64>],
    pbar: &[Vec<f64>],
    kappa: f64,
    weights: Option<&[Vec<f64>]>,
    policy_eval: Option<&[f64]>,
) -> Result<()> {
    if kappa < 0.0 {
        return Err(Error::InvalidBudget { budget: kappa });
    }
    if z.is_empty() || z.len() != pbar.len() {
        return Err(Error::ConfigurationError(format!(
            "s-rectangular update needs matching action lists, got {} and {}",
            z.len(),
            pbar.len()
        )));
    }
    for (a, (za, pa)) in z.iter().zip(pbar.iter()).enumerate() {
        if za.len() != pa.len() || za.is_empty() {
            return Err(Error::ConfigurationError(format!(
                "action {} has {} returns for {} probabilities",
                a,
                za.len(),
                pa.len()
            )));
        }
    }
    if let Some(w) = weights {
        if w.len() != z.len() || w.iter().zip(pbar).any(|(wa, pa)| wa.len() != pa.len()) {
            return Err(Error::ConfigurationError(
                "weights do not match the transition support".to_string(),
            ));
        }
    }
    if let Some(pinned) = policy_eval {
        if pinned.len() != z.len() {
            return Err(Error::InvalidDistribution(format!(
                "pinned policy has {} entries for {} actions",
                pinned.len(),
                z.len()
            )));
        }
        if pinned.iter().any(|&p| p < 0.0)
            || (pinned.iter().sum::<f64>() - 1.0).abs() >= EPSILON
        {
            return Err(Error::InvalidDistribution(
                "pinned policy is not a distribution".to_string(),
            ));
        }
    }
    Ok(())
}
