//! Value iteration.

use std::time::Instant;

use log::{debug, warn};

use crate::error::Result;
use crate::model::Mdp;
use crate::optimization::SimplexSolver;
use crate::solver::{assemble_solution, Solution, SolveConfig, Sweep, SweepRunner};

/// Iterates the Bellman operator from the zero value function until the
/// residual drops below the threshold implied by `max_residual`, or a budget
/// runs out.
///
/// Running past `max_iterations` or `max_time` is not an error: the solution
/// is returned with `converged` set to false.
pub fn value_iteration(mdp: &Mdp, config: &SolveConfig) -> Result<Solution> {
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

    while iterations < config.max_iterations {
        let residual = match config.sweep {
            Sweep::GaussSeidel => runner.gauss_seidel_sweep(&mut value)?,
            Sweep::Jacobi => {
                let (_, next, residual) = runner.jacobi_sweep(&value)?;
                value = next;
                residual
            }
        };
        iterations += 1;
        residuals.push(residual);
        debug!("value iteration {}: residual {:e}", iterations, residual);
        if residual <= threshold {
            converged = true;
            break;
        }
        if runner.out_of_time() {
            warn!(
                "value iteration stopped by the time budget after {} iterations, residual {:e}",
                iterations, residual
            );
            break;
        }
    }
    if !converged && iterations >= config.max_iterations {
        warn!(
            "value iteration exhausted {} iterations, residual {:e}",
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
