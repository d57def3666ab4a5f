//! Modified (Jacobi) policy iteration.

use std::time::Instant;

use log::{debug, warn};

use crate::error::Result;
use crate::model::{ActionChoice, Mdp};
use crate::optimization::SimplexSolver;
use crate::solver::{assemble_solution, Solution, SolveConfig, SweepRunner};

/// Alternates a greedy improvement sweep with up to `eval_sweeps` partial
/// evaluation sweeps under the improved policy. With `eval_sweeps = 1` this
/// degenerates to Jacobi value iteration; large values approach full policy
/// iteration. Both phases run from a frozen snapshot and parallelize across
/// states.
///
/// Stopping mirrors [`super::value_iteration`]: the improvement residual is
/// compared against the threshold implied by `max_residual`, and exhausted
/// iteration or time budgets return a solution with `converged` false.
pub fn modified_policy_iteration(mdp: &Mdp, config: &SolveConfig) -> Result<Solution> {
    let start = Instant::now();
    config.validate(mdp)?;
    mdp.validate(config.transition_policy)?;
    let resolved = mdp.resolved(config.transition_policy);
    let mdp = resolved.as_ref();

    let lp = SimplexSolver::default();
    let runner = SweepRunner::new(mdp, config, &lp, start);
    let threshold = config.threshold();

    let mut value = vec![0.0; mdp.num_states()];
    let mut residuals = Vec::new();
    let mut iterations = 0;
    let mut converged = false;
    let mut timed_out = false;

    'outer: while iterations < config.max_iterations {
        let (decisions, next, residual) = runner.jacobi_sweep(&value)?;
        value = next;
        iterations += 1;
        residuals.push(residual);
        debug!("policy iteration {}: residual {:e}", iterations, residual);
        if residual <= threshold {
            converged = true;
            break;
        }
        if runner.out_of_time() {
            timed_out = true;
            break;
        }

        // partial evaluation under the freshly improved policy
        let choices: Vec<ActionChoice> = decisions.into_iter().map(|d| d.choice).collect();
        for _ in 0..config.eval_sweeps {
            let (next, inner_residual) = runner.evaluation_sweep(&value, &choices)?;
            value = next;
            if inner_residual <= threshold {
                break;
            }
            if runner.out_of_time() {
                timed_out = true;
                break 'outer;
            }
        }
    }
    if timed_out {
        warn!(
            "policy iteration stopped by the time budget after {} iterations",
            iterations
        );
    } else if !converged {
        warn!(
            "policy iteration exhausted {} iterations, residual {:e}",
            iterations,
            residuals.last().copied().unwrap_or(f64::INFINITY)
        );
    }

    let decisions = runner.extract(&value)?;
    Ok(assemble_solution(
        mdp,
        config,
        decisions,
        value,
        residuals,
        iterations,
        runner.elapsed(),
        converged,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nature::{Ambiguity, NatureModel};
    use crate::solver::{value_iteration, Objective};
    use approx::assert_relative_eq;

    fn chain_with_choice() -> Mdp {
        // three states; state 0 chooses between a safe self-loop and a noisy
        // jump toward the rewarding state 2
        let mut mdp = Mdp::new();
        mdp.add_transition(0, 0, 0, 1.0, 1.0);
        mdp.add_transition(0, 1, 1, 0.5, 0.0);
        mdp.add_transition(0, 1, 2, 0.5, 0.0);
        mdp.add_transition(1, 0, 2, 1.0, 1.0);
        mdp.add_transition(2, 0, 2, 1.0, 4.0);
        mdp
    }

    #[test]
    fn test_matches_value_iteration_on_plain_model() {
        let mdp = chain_with_choice();
        let config = SolveConfig::default();
        let vi = value_iteration(&mdp, &config).unwrap();
        let mpi = modified_policy_iteration(&mdp, &config).unwrap();
        assert!(mpi.converged);
        assert_eq!(mpi.policy, vi.policy);
        for (a, b) in mpi.value.iter().zip(vi.value.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_matches_value_iteration_on_robust_model() {
        let mdp = chain_with_choice();
        let config = SolveConfig {
            objective: Objective::Robust,
            ambiguity: Some(Ambiguity::sa(NatureModel::Linf, 0.2)),
            ..SolveConfig::default()
        };
        let vi = value_iteration(&mdp, &config).unwrap();
        let mpi = modified_policy_iteration(&mdp, &config).unwrap();
        assert_eq!(mpi.policy, vi.policy);
        for (a, b) in mpi.value.iter().zip(vi.value.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_needs_fewer_improvement_sweeps() {
        let mdp = chain_with_choice();
        let vi = value_iteration(&mdp, &SolveConfig::default()).unwrap();
        let mpi = modified_policy_iteration(&mdp, &SolveConfig::default()).unwrap();
        // the evaluation sweeps do the bulk of the contraction
        assert!(mpi.iterations < vi.iterations);
    }

    #[test]
    fn test_single_eval_sweep_still_converges() {
        let mdp = chain_with_choice();
        let mpi = modified_policy_iteration(
            &mdp,
            &SolveConfig {
                eval_sweeps: 1,
                ..SolveConfig::default()
            },
        )
        .unwrap();
        assert!(mpi.converged);
        assert_relative_eq!(mpi.value[2], 40.0, epsilon = 1e-2);
    }

    #[test]
    fn test_agrees_with_value_iteration_on_random_models() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..5 {
            let states = rng.gen_range(2..6);
            let mut mdp = Mdp::with_states(states);
            for s in 0..states {
                for a in 0..rng.gen_range(1..4) {
                    let mut mass: Vec<f64> = (0..states).map(|_| rng.gen_range(0.0..1.0)).collect();
                    let total: f64 = mass.iter().sum();
                    for p in &mut mass {
                        *p /= total;
                    }
                    for (to, &p) in mass.iter().enumerate() {
                        mdp.add_transition(s, a, to, p, rng.gen_range(-1.0..1.0));
                    }
                }
            }
            let config = SolveConfig::default();
            let vi = value_iteration(&mdp, &config).unwrap();
            let mpi = modified_policy_iteration(&mdp, &config).unwrap();
            for (a, b) in mpi.value.iter().zip(vi.value.iter()) {
                assert_relative_eq!(a, b, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_iteration_budget_reports_not_converged() {
        let mdp = chain_with_choice();
        let mpi = modified_policy_iteration(
            &mdp,
            &SolveConfig {
                max_iterations: 1,
                eval_sweeps: 1,
                ..SolveConfig::default()
            },
        )
        .unwrap();
        assert!(!mpi.converged);
        assert_eq!(mpi.iterations, 1);
    }
}
