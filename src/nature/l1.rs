//! Closed-form worst-case response for the (weighted) L1 ambiguity set.
//!
//! Solves `min_p p . values` subject to `||p - baseline||_{1,w} <= budget`,
//! `1'p = 1`, `p >= 0`. Unweighted, the optimum moves mass from the least
//! favorable support points onto the single most favorable one, so the LP
//! collapses to a sort plus one linear pass: O(n log n).
//!
//! With weights the cheapest recipient need not be the most favorable one,
//! and a donor may split its mass across recipients. The weighted path scans
//! the multiplier of the budget constraint instead: at multiplier `lambda`
//! every donor `i` with `values[i] - lambda*w[i]` above the cheapest
//! receiving price `min_j (values[j] + lambda*w[j])` moves all of its mass to
//! that arg-min. The induced cost is piecewise constant and nonincreasing in
//! `lambda`, so the optimum is a mixture of the two configurations straddling
//! the budget, found by scanning the O(n^2) breakpoints.

use super::Response;

/// Cost below which a mass move is treated as free of budget.
const FREE_MOVE: f64 = 1e-12;

/// Worst-case (minimizing) response. Inputs are validated by the caller.
pub(crate) fn worst(
    baseline: &[f64],
    values: &[f64],
    budget: f64,
    weights: Option<&[f64]>,
) -> Response {
    match weights {
        Some(w) => weighted(baseline, values, budget, w),
        None => unweighted(baseline, values, budget),
    }
}

fn unweighted(baseline: &[f64], values: &[f64], budget: f64) -> Response {
    let n = baseline.len();

    // support sorted by value ascending, index ascending on ties
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        values[i]
            .partial_cmp(&values[j])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(i.cmp(&j))
    });

    let recipient = order[0];
    let mut distribution = baseline.to_vec();
    let mut remaining = budget;

    // drain donors from the least favorable end until the budget runs out;
    // moving one unit of mass costs 2 units of L1 budget
    for &donor in order.iter().rev() {
        if values[donor] <= values[recipient] {
            break;
        }
        if remaining <= 0.0 || distribution[donor] <= 0.0 {
            continue;
        }
        let moved = distribution[donor].min(remaining / 2.0);
        distribution[donor] -= moved;
        distribution[recipient] += moved;
        remaining -= moved * 2.0;
    }

    response(distribution, values)
}

fn weighted(baseline: &[f64], values: &[f64], budget: f64, weights: &[f64]) -> Response {
    let n = baseline.len();

    // the configuration changes where a donor's discounted value meets the
    // cheapest receiving price, and where two receiving prices cross
    let mut breakpoints = vec![0.0];
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let gain = values[i] - values[j];
            let cost = weights[i] + weights[j];
            if gain > 0.0 && cost > FREE_MOVE {
                breakpoints.push(gain / cost);
            }
            if i < j {
                let crossing = (values[i] - values[j]) / (weights[j] - weights[i]);
                if crossing.is_finite() && crossing > 0.0 {
                    breakpoints.push(crossing);
                }
            }
        }
    }
    breakpoints.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    // one multiplier inside each interval, where the configuration is free of
    // ties, plus one beyond the last breakpoint
    let mut grid = Vec::with_capacity(breakpoints.len() + 1);
    for pair in breakpoints.windows(2) {
        if pair[1] - pair[0] > FREE_MOVE {
            grid.push(0.5 * (pair[0] + pair[1]));
        }
    }
    grid.push(breakpoints.last().copied().unwrap_or(0.0) + 1.0);

    let mut previous: Option<(Vec<f64>, f64)> = None;
    for &lambda in &grid {
        let (distribution, cost) = configuration(baseline, values, weights, lambda);
        if cost <= budget {
            let distribution = match previous {
                // spend the budget exactly by mixing with the configuration
                // from the next-cheaper multiplier interval
                Some((above, above_cost)) if above_cost > cost => {
                    let t = (budget - cost) / (above_cost - cost);
                    above
                        .iter()
                        .zip(distribution.iter())
                        .map(|(&a, &b)| t * a + (1.0 - t) * b)
                        .collect()
                }
                _ => distribution,
            };
            return response(distribution, values);
        }
        previous = Some((distribution, cost));
    }
    // the final grid point has no budgeted movers, so it is never reached
    response(baseline.to_vec(), values)
}

/// The optimal distribution when the budget constraint is priced at
/// `lambda`: every donor above the cheapest receiving price moves all of its
/// mass to the arg-min recipient. Returns the distribution and its L1 cost.
fn configuration(
    baseline: &[f64],
    values: &[f64],
    weights: &[f64],
    lambda: f64,
) -> (Vec<f64>, f64) {
    let n = baseline.len();
    let mut recipient = 0;
    for j in 1..n {
        if values[j] + lambda * weights[j] < values[recipient] + lambda * weights[recipient] {
            recipient = j;
        }
    }
    let price = values[recipient] + lambda * weights[recipient];

    let mut distribution = baseline.to_vec();
    let mut cost = 0.0;
    for i in 0..n {
        if i != recipient && values[i] - lambda * weights[i] > price && distribution[i] > 0.0 {
            cost += distribution[i] * (weights[i] + weights[recipient]);
            distribution[recipient] += distribution[i];
            distribution[i] = 0.0;
        }
    }
    (distribution, cost)
}

fn response(distribution: Vec<f64>, values: &[f64]) -> Response {
    let objective = distribution
        .iter()
        .zip(values.iter())
        .map(|(&p, &z)| p * z)
        .sum();
    Response {
        distribution,
        objective,
    }
}
