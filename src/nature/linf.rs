//! Worst-case response for the (weighted) L∞ ambiguity set.
//!
//! Each coordinate is clamped to `[q_i - budget/w_i, q_i + budget/w_i] ∩
//! [0, 1]`; the simplex constraint `1'p = 1` is then restored by a bisection
//! search on its Lagrange multiplier, which is monotone in the multiplier,
//! followed by a redistribution pass that lands exactly on the simplex.

use crate::error::{Error, Result};
use crate::model::EPSILON;

use super::Response;

/// Worst-case (minimizing) response. Inputs are validated by the caller;
/// `max_iterations` caps the bisection steps.
pub(crate) fn worst(
    baseline: &[f64],
    values: &[f64],
    budget: f64,
    weights: Option<&[f64]>,
    max_iterations: usize,
) -> Result<Response> {
    let n = baseline.len();
    let radius = |i: usize| match weights {
        Some(w) if w[i] > EPSILON => budget / w[i],
        Some(_) => f64::INFINITY,
        None => budget,
    };
    let lower: Vec<f64> = (0..n).map(|i| (baseline[i] - radius(i)).max(0.0)).collect();
    let upper: Vec<f64> = (0..n).map(|i| (baseline[i] + radius(i)).min(1.0)).collect();

    // coordinates with value <= lambda sit at their upper bound, the rest at
    // their lower bound; the total mass is nondecreasing in lambda
    let mass = |lambda: f64| -> f64 {
        (0..n)
            .map(|i| if values[i] <= lambda { upper[i] } else { lower[i] })
            .sum()
    };

    let mut lo = values.iter().cloned().fold(f64::INFINITY, f64::min) - 1.0;
    let mut hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max) + 1.0;
    for _ in 0..max_iterations {
        let mid = 0.5 * (lo + hi);
        let total = mass(mid);
        if (total - 1.0).abs() <= EPSILON {
            hi = mid;
            break;
        }
        if total < 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    // mass(hi) >= 1; walk the raised coordinates from the least favorable end
    // and push the surplus back toward their lower bounds
    let mut distribution: Vec<f64> = (0..n)
        .map(|i| if values[i] <= hi { upper[i] } else { lower[i] })
        .collect();
    let mut surplus = distribution.iter().sum::<f64>() - 1.0;
    if surplus < -EPSILON {
        return Err(Error::InfeasibleAmbiguity(format!(
            "L-infinity ball with budget {} does not reach the simplex",
            budget
        )));
    }

    let mut raised: Vec<usize> = (0..n).filter(|&i| values[i] <= hi).collect();
    raised.sort_by(|&i, &j| {
        values[j]
            .partial_cmp(&values[i])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(j.cmp(&i))
    });
    for i in raised {
        if surplus <= 0.0 {
            break;
        }
        let give = surplus.min(distribution[i] - lower[i]);
        distribution[i] -= give;
        surplus -= give;
    }
    if surplus > EPSILON {
        return Err(Error::InfeasibleAmbiguity(format!(
            "could not restore the simplex constraint within budget {}",
            budget
        )));
    }

    let objective = distribution
        .iter()
        .zip(values.iter())
        .map(|(&p, &z)| p * z)
        .sum();
    Ok(Response {
        distribution,
        objective,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    #[test]
    fn test_deviation_bounded_by_budget() {
        let baseline = [0.3, 0.3, 0.4];
        let values = [1.0, -4.0, 2.0];
        let budget = 0.15;
        let r = worst(&baseline, &values, budget, None, 64).unwrap();
        for (p, q) in r.distribution.iter().zip(baseline.iter()) {
            assert!((p - q).abs() <= budget + 1e-9);
        }
        assert_abs_diff_eq!(r.distribution.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        // mass flows toward the minimizing coordinate
        assert_relative_eq!(r.distribution[1], 0.45, epsilon = 1e-6);
    }

    #[test]
    fn test_exact_small_case() {
        // budget large enough to zero out the worst coordinate but not more
        let baseline = [0.5, 0.5];
        let values = [10.0, 0.0];
        let r = worst(&baseline, &values, 0.3, None, 64).unwrap();
        assert_abs_diff_eq!(r.distribution[0], 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(r.distribution[1], 0.8, epsilon = 1e-6);
        assert_abs_diff_eq!(r.objective, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_weighted_radius() {
        let baseline = [0.5, 0.5];
        let values = [10.0, 0.0];
        // weight 2 on the first coordinate halves its movement radius
        let weights = [2.0, 1.0];
        let r = worst(&baseline, &values, 0.4, Some(&weights), 64).unwrap();
        assert_abs_diff_eq!(r.distribution[0], 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(r.distribution[1], 0.7, epsilon = 1e-6);
    }

    #[test]
    fn test_full_budget_reaches_point_mass() {
        let baseline = [0.25, 0.25, 0.25, 0.25];
        let values = [3.0, 1.0, 8.0, 5.0];
        let r = worst(&baseline, &values, 1.0, None, 64).unwrap();
        assert_abs_diff_eq!(r.distribution[1], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(r.objective, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_simplex_restored_for_every_budget() {
        let baseline = [0.1, 0.2, 0.3, 0.4];
        let values = [4.0, 3.0, 2.0, 1.0];
        for step in 0..20 {
            let budget = step as f64 * 0.05;
            let r = worst(&baseline, &values, budget, None, 64).unwrap();
            assert_abs_diff_eq!(r.distribution.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            assert!(r.distribution.iter().all(|&p| p >= -1e-12));
        }
    }
}
