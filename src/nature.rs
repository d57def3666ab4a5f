//! Ambiguity sets and nature's response.
//!
//! Given a baseline distribution, a vector of values over the same support,
//! and a deviation budget, nature picks the distribution inside the ambiguity
//! set that is worst (robust) or best (optimistic) for the decision maker.
//! The per-action L1 and L∞ geometries admit closed-form or bisection
//! solutions and never touch a general LP solver; the jointly budgeted
//! s-rectangular case lives in [`crate::optimization::srect`].

pub mod l1;
pub mod linf;

use crate::error::{Error, Result};
use crate::model::EPSILON;

/// Default cap on bisection steps for the L∞ response.
pub const DEFAULT_BISECTION_ITERATIONS: usize = 64;

/// Which side of the ambiguity set nature takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Nature minimizes the decision maker's value.
    Worst,
    /// Nature maximizes the decision maker's value.
    Best,
}

/// The closed set of supported ambiguity geometries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatureModel {
    /// `||p - baseline||_{1,w} <= budget`.
    L1,
    /// `||p - baseline||_{inf,w} <= budget`.
    Linf,
}

/// Whether budgets are independent per `(state, action)` or shared across all
/// actions of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rectangularity {
    /// One budget per `(state, action)` pair.
    Sa,
    /// One budget per state, allocated jointly across its actions.
    S,
}

/// Deviation budgets attached to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Budgets {
    /// The same budget everywhere.
    Uniform(f64),
    /// One budget per state.
    PerState(Vec<f64>),
    /// One budget per `(state, action)`; invalid with [`Rectangularity::S`].
    PerStateAction(Vec<Vec<f64>>),
}

impl Budgets {
    /// Budget for a `(state, action)` pair under sa-rectangularity.
    pub fn budget(&self, state: usize, action: usize) -> Result<f64> {
        match self {
            Budgets::Uniform(kappa) => Ok(*kappa),
            Budgets::PerState(v) => v.get(state).copied().ok_or_else(|| {
                Error::ConfigurationError(format!("no budget for state {}", state))
            }),
            Budgets::PerStateAction(v) => v
                .get(state)
                .and_then(|row| row.get(action))
                .copied()
                .ok_or_else(|| {
                    Error::ConfigurationError(format!(
                        "no budget for state {}, action {}",
                        state, action
                    ))
                }),
        }
    }

    /// Shared budget for a state under s-rectangularity.
    pub fn state_budget(&self, state: usize) -> Result<f64> {
        match self {
            Budgets::Uniform(kappa) => Ok(*kappa),
            Budgets::PerState(v) => v.get(state).copied().ok_or_else(|| {
                Error::ConfigurationError(format!("no budget for state {}", state))
            }),
            Budgets::PerStateAction(_) => Err(Error::ConfigurationError(
                "per-(state,action) budgets cannot be shared across a state".to_string(),
            )),
        }
    }

    /// Checks that no budget is negative.
    pub fn validate(&self) -> Result<()> {
        let check = |kappa: f64| {
            if kappa < 0.0 {
                Err(Error::InvalidBudget { budget: kappa })
            } else {
                Ok(())
            }
        };
        match self {
            Budgets::Uniform(kappa) => check(*kappa),
            Budgets::PerState(v) => v.iter().copied().try_for_each(check),
            Budgets::PerStateAction(v) => {
                v.iter().flatten().copied().try_for_each(check)
            }
        }
    }
}

/// The full ambiguity description attached to a robust or optimistic solve.
#[derive(Debug, Clone, PartialEq)]
pub struct Ambiguity {
    pub model: NatureModel,
    pub rectangularity: Rectangularity,
    pub budgets: Budgets,
    /// Optional norm weights indexed `[state][action][support position]`,
    /// where the support is the action's successor list (or its outcome list
    /// for augmented actions). Uniform weights of one when omitted.
    pub weights: Option<Vec<Vec<Vec<f64>>>>,
}

impl Ambiguity {
    /// An sa-rectangular ambiguity set with a uniform budget and unit weights.
    pub fn sa(model: NatureModel, budget: f64) -> Self {
        Ambiguity {
            model,
            rectangularity: Rectangularity::Sa,
            budgets: Budgets::Uniform(budget),
            weights: None,
        }
    }

    /// An s-rectangular ambiguity set with a uniform shared budget.
    pub fn s(model: NatureModel, budget: f64) -> Self {
        Ambiguity {
            model,
            rectangularity: Rectangularity::S,
            budgets: Budgets::Uniform(budget),
            weights: None,
        }
    }

    pub(crate) fn weights_for(&self, state: usize, action: usize) -> Option<&[f64]> {
        self.weights
            .as_ref()
            .and_then(|w| w.get(state))
            .and_then(|row| row.get(action))
            .map(|w| w.as_slice())
    }
}

/// A nature response: the adjusted distribution and its realized objective.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub distribution: Vec<f64>,
    pub objective: f64,
}

/// Computes nature's response for a single baseline distribution.
///
/// Solves `argmin/argmax_p p . values` over the ambiguity set
/// `{ p : ||p - baseline||_{model,weights} <= budget, 1'p = 1, p >= 0 }`.
/// Pure function of its inputs.
///
/// # Examples
///
/// ```
/// use rmdp::nature::{respond, Direction, NatureModel};
///
/// let baseline = [0.5, 0.5];
/// let values = [10.0, 0.0];
/// // half the L1 budget moves 0.25 of mass onto the low-value support point
/// let response = respond(NatureModel::L1, &baseline, &values, 0.5, None, Direction::Worst)
///     .unwrap();
/// assert!((response.objective - 2.5).abs() < 1e-9);
/// ```
pub fn respond(
    model: NatureModel,
    baseline: &[f64],
    values: &[f64],
    budget: f64,
    weights: Option<&[f64]>,
    direction: Direction,
) -> Result<Response> {
    respond_with(
        model,
        baseline,
        values,
        budget,
        weights,
        direction,
        DEFAULT_BISECTION_ITERATIONS,
    )
}

/// Like [`respond`] but with an explicit cap on L∞ bisection steps.
pub fn respond_with(
    model: NatureModel,
    baseline: &[f64],
    values: &[f64],
    budget: f64,
    weights: Option<&[f64]>,
    direction: Direction,
    bisection_cap: usize,
) -> Result<Response> {
    validate_inputs(baseline, values, budget, weights)?;
    match direction {
        Direction::Worst => respond_worst(model, baseline, values, budget, weights, bisection_cap),
        Direction::Best => {
            // the best case is the worst case on negated values
            let negated: Vec<f64> = values.iter().map(|&z| -z).collect();
            let mut response =
                respond_worst(model, baseline, &negated, budget, weights, bisection_cap)?;
            response.objective = -response.objective;
            Ok(response)
        }
    }
}

fn respond_worst(
    model: NatureModel,
    baseline: &[f64],
    values: &[f64],
    budget: f64,
    weights: Option<&[f64]>,
    bisection_cap: usize,
) -> Result<Response> {
    match model {
        NatureModel::L1 => Ok(l1::worst(baseline, values, budget, weights)),
        NatureModel::Linf => linf::worst(baseline, values, budget, weights, bisection_cap),
    }
}

fn validate_inputs(
    baseline: &[f64],
    values: &[f64],
    budget: f64,
    weights: Option<&[f64]>,
) -> Result<()> {
    if budget < 0.0 {
        return Err(Error::InvalidBudget { budget });
    }
    if baseline.is_empty() {
        return Err(Error::InvalidDistribution(
            "baseline distribution is empty".to_string(),
        ));
    }
    if values.len() != baseline.len() {
        return Err(Error::InvalidDistribution(format!(
            "values length {} does not match baseline length {}",
            values.len(),
            baseline.len()
        )));
    }
    if baseline.iter().any(|&p| p < 0.0) {
        return Err(Error::InvalidDistribution(
            "baseline has a negative entry".to_string(),
        ));
    }
    let sum: f64 = baseline.iter().sum();
    if (sum - 1.0).abs() >= EPSILON {
        return Err(Error::InvalidDistribution(format!(
            "baseline sums to {}",
            sum
        )));
    }
    if let Some(w) = weights {
        if w.len() != baseline.len() {
            return Err(Error::InvalidDistribution(format!(
                "weights length {} does not match baseline length {}",
                w.len(),
                baseline.len()
            )));
        }
        if w.iter().any(|&x| x < 0.0) {
            return Err(Error::InvalidDistribution(
                "weights have a negative entry".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dot(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_zero_budget_returns_baseline() {
        let baseline = [0.3, 0.2, 0.5];
        let values = [5.0, -1.0, 2.0];
        for model in [NatureModel::L1, NatureModel::Linf] {
            for direction in [Direction::Worst, Direction::Best] {
                let r = respond(model, &baseline, &values, 0.0, None, direction).unwrap();
                for (p, q) in r.distribution.iter().zip(baseline.iter()) {
                    assert_relative_eq!(p, q, epsilon = 1e-9);
                }
                assert_relative_eq!(r.objective, dot(&baseline, &values), epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_large_budget_concentrates_on_extremum() {
        let baseline = [0.25, 0.25, 0.25, 0.25];
        let values = [4.0, -3.0, 2.0, 7.0];
        for model in [NatureModel::L1, NatureModel::Linf] {
            let worst = respond(model, &baseline, &values, 100.0, None, Direction::Worst).unwrap();
            assert_relative_eq!(worst.objective, -3.0, epsilon = 1e-6);
            assert_relative_eq!(worst.distribution[1], 1.0, epsilon = 1e-6);

            let best = respond(model, &baseline, &values, 100.0, None, Direction::Best).unwrap();
            assert_relative_eq!(best.objective, 7.0, epsilon = 1e-6);
            assert_relative_eq!(best.distribution[3], 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_monotone_in_budget() {
        let baseline = [0.4, 0.1, 0.5];
        let values = [3.0, -2.0, 1.0];
        for model in [NatureModel::L1, NatureModel::Linf] {
            let budgets: Vec<f64> = (0..9).map(|i| i as f64 * 0.25).collect();
            let worst_values: Vec<f64> = budgets
                .iter()
                .map(|&k| {
                    respond(model, &baseline, &values, k, None, Direction::Worst)
                        .unwrap()
                        .objective
                })
                .collect();
            let best_values: Vec<f64> = budgets
                .iter()
                .map(|&k| {
                    respond(model, &baseline, &values, k, None, Direction::Best)
                        .unwrap()
                        .objective
                })
                .collect();
            // larger budgets never help the worst case, never hurt the best
            for pair in worst_values.windows(2) {
                assert!(pair[1] <= pair[0] + 1e-9);
            }
            for pair in best_values.windows(2) {
                assert!(pair[1] >= pair[0] - 1e-9);
            }
        }
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let baseline = [0.5, 0.5];
        let values = [1.0, 2.0];
        assert!(matches!(
            respond(NatureModel::L1, &baseline, &values, -1.0, None, Direction::Worst),
            Err(Error::InvalidBudget { .. })
        ));
        assert!(matches!(
            respond(NatureModel::L1, &[0.9, 0.5], &values, 1.0, None, Direction::Worst),
            Err(Error::InvalidDistribution(_))
        ));
        assert!(matches!(
            respond(NatureModel::L1, &baseline, &[1.0], 1.0, None, Direction::Worst),
            Err(Error::InvalidDistribution(_))
        ));
    }

    #[test]
    fn test_budget_validation() {
        assert!(Budgets::Uniform(0.5).validate().is_ok());
        assert!(matches!(
            Budgets::PerState(vec![0.1, -0.2]).validate(),
            Err(Error::InvalidBudget { .. })
        ));
        assert!(matches!(
            Budgets::PerStateAction(vec![vec![0.1], vec![0.2, -1.0]]).validate(),
            Err(Error::InvalidBudget { .. })
        ));
    }
}
