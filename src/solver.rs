//! Outer solver loops driving the Bellman operator to a fixed point.
//!
//! Two algorithms are provided: value iteration
//! ([`value_iteration::value_iteration`]) and modified (Jacobi) policy
//! iteration ([`policy_iteration::modified_policy_iteration`]). Both share
//! the sweep machinery here: Gauss-Seidel sweeps update the value function in
//! place and must stay sequential; Jacobi sweeps read a frozen snapshot and
//! fan out across states with rayon.

pub mod policy_iteration;
pub mod value_iteration;

use std::time::{Duration, Instant};

use log::trace;
use rayon::prelude::*;

use crate::bellman::{Decision, UpdateContext};
use crate::error::{Error, Result};
use crate::model::{ActionChoice, Mdp, Policy, TransitionPolicy, EPSILON};
use crate::nature::{Ambiguity, Direction, Rectangularity};
use crate::optimization::LpSolver;

pub use policy_iteration::modified_policy_iteration;
pub use value_iteration::value_iteration;

/// Whose side nature takes during the solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Objective {
    /// No ambiguity: the nominal transition model is trusted.
    #[default]
    Plain,
    /// Nature adversarially minimizes within the ambiguity set.
    Robust,
    /// Nature cooperatively maximizes within the ambiguity set.
    Optimistic,
}

/// Sweep order of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sweep {
    /// In-place updates; later states see earlier updates of the same sweep.
    /// Faster in practice, inherently sequential.
    #[default]
    GaussSeidel,
    /// Updates computed from a frozen snapshot, parallelized across states.
    Jacobi,
}

/// Everything a solve call needs besides the model.
#[derive(Debug, Clone)]
pub struct SolveConfig {
    /// Discount factor in `[0, 1]`.
    pub discount: f64,
    pub objective: Objective,
    /// Required for robust and optimistic objectives, forbidden for plain.
    pub ambiguity: Option<Ambiguity>,
    pub sweep: Sweep,
    /// How partially specified transition rows are resolved before solving.
    pub transition_policy: TransitionPolicy,
    /// Per-state pins: states with a choice are evaluated under it instead of
    /// optimized, allowing partial-policy evaluation. Pin every state to
    /// evaluate a complete policy.
    pub fixed_policy: Option<Vec<Option<ActionChoice>>>,
    /// Target precision of the value function.
    pub max_residual: f64,
    pub max_iterations: usize,
    /// Wall-clock budget, checked at sweep boundaries.
    pub max_time: Option<Duration>,
    /// Fixed-policy evaluation sweeps per improvement step of modified
    /// policy iteration.
    pub eval_sweeps: usize,
}

impl Default for SolveConfig {
    fn default() -> Self {
        SolveConfig {
            discount: 0.9,
            objective: Objective::Plain,
            ambiguity: None,
            sweep: Sweep::default(),
            transition_policy: TransitionPolicy::default(),
            fixed_policy: None,
            max_residual: 1e-4,
            max_iterations: 100_000,
            max_time: None,
            eval_sweeps: 50,
        }
    }
}

impl SolveConfig {
    pub(crate) fn validate(&self, mdp: &Mdp) -> Result<()> {
        if !(0.0..=1.0).contains(&self.discount) {
            return Err(Error::ConfigurationError(format!(
                "discount {} outside [0, 1]",
                self.discount
            )));
        }
        if !(self.max_residual > 0.0) || !self.max_residual.is_finite() {
            return Err(Error::ConfigurationError(format!(
                "max_residual {} must be positive",
                self.max_residual
            )));
        }
        if self.max_iterations == 0 {
            return Err(Error::ConfigurationError(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.eval_sweeps == 0 {
            return Err(Error::ConfigurationError(
                "eval_sweeps must be at least 1".to_string(),
            ));
        }
        if mdp.num_states() == 0 {
            return Err(Error::ConfigurationError(
                "the model has no states".to_string(),
            ));
        }
        match (self.objective, &self.ambiguity) {
            (Objective::Plain, Some(_)) => {
                return Err(Error::ConfigurationError(
                    "the plain objective does not accept an ambiguity set".to_string(),
                ));
            }
            (Objective::Robust | Objective::Optimistic, None) => {
                return Err(Error::ConfigurationError(
                    "robust and optimistic objectives need an ambiguity set".to_string(),
                ));
            }
            _ => {}
        }
        if let Some(ambiguity) = &self.ambiguity {
            ambiguity.budgets.validate()?;
            if self.objective == Objective::Optimistic
                && ambiguity.rectangularity == Rectangularity::S
            {
                return Err(Error::ConfigurationError(
                    "the optimistic objective requires sa-rectangular budgets".to_string(),
                ));
            }
        }
        if let Some(pins) = &self.fixed_policy {
            if pins.len() != mdp.num_states() {
                return Err(Error::ConfigurationError(format!(
                    "fixed policy covers {} states of {}",
                    pins.len(),
                    mdp.num_states()
                )));
            }
            for (s, pin) in pins.iter().enumerate() {
                let state = &mdp.states()[s];
                match pin {
                    None => {}
                    Some(ActionChoice::Fixed(a)) => {
                        if !state.is_terminal() && *a >= state.num_actions() {
                            return Err(Error::ConfigurationError(format!(
                                "fixed policy picks action {} in state {} with {} actions",
                                a,
                                s,
                                state.num_actions()
                            )));
                        }
                    }
                    Some(ActionChoice::Randomized(row)) => {
                        if state.is_terminal() {
                            continue;
                        }
                        if row.len() != state.num_actions()
                            || row.iter().any(|&p| p < 0.0)
                            || (row.iter().sum::<f64>() - 1.0).abs() >= EPSILON
                        {
                            return Err(Error::InvalidDistribution(format!(
                                "fixed policy row for state {} is not a distribution",
                                s
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn direction(&self) -> Option<Direction> {
        match self.objective {
            Objective::Plain => None,
            Objective::Robust => Some(Direction::Worst),
            Objective::Optimistic => Some(Direction::Best),
        }
    }

    /// Residual threshold implied by the standard discounted stopping bound
    /// `||V - V*|| <= 2 gamma / (1 - gamma) * residual`.
    pub(crate) fn threshold(&self) -> f64 {
        if self.discount > 0.0 && self.discount < 1.0 {
            self.max_residual * (1.0 - self.discount) / (2.0 * self.discount)
        } else if self.discount == 0.0 {
            self.max_residual
        } else {
            // undiscounted: only the iteration and time budgets can stop us
            0.0
        }
    }
}

/// The immutable result bundle of a solve call.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Value function, one entry per state.
    pub value: Vec<f64>,
    pub policy: Policy,
    /// Nature's realized distribution for each state's chosen action
    /// (sa-rectangular robust/optimistic solves only). The distribution is
    /// over the chosen action's successor list, or its outcome list for
    /// augmented actions.
    pub nature: Option<Vec<Vec<f64>>>,
    /// Realized per-action budget allocation (s-rectangular solves only).
    pub budgets: Option<Vec<Vec<f64>>>,
    /// Residual of the final iteration.
    pub residual: f64,
    /// Residual trace, one entry per outer iteration.
    pub residuals: Vec<f64>,
    pub iterations: usize,
    pub elapsed: Duration,
    /// False when an iteration or time budget cut the solve short.
    pub converged: bool,
}

/// One solve's sweep executor: the update context plus the per-state pins.
pub(crate) struct SweepRunner<'a> {
    context: UpdateContext<'a>,
    pins: Option<&'a [Option<ActionChoice>]>,
    start: Instant,
    max_time: Option<Duration>,
}

impl<'a> SweepRunner<'a> {
    pub(crate) fn new(
        mdp: &'a Mdp,
        config: &'a SolveConfig,
        lp: &'a dyn LpSolver,
        start: Instant,
    ) -> Self {
        SweepRunner {
            context: UpdateContext {
                mdp,
                discount: config.discount,
                ambiguity: config.ambiguity.as_ref(),
                direction: config.direction(),
                lp,
            },
            pins: config.fixed_policy.as_deref(),
            start,
            max_time: config.max_time,
        }
    }

    fn update(&self, s: usize, value: &[f64]) -> Result<Decision> {
        match self.pins.and_then(|pins| pins[s].as_ref()) {
            Some(choice) => self.context.evaluate(s, value, choice),
            None => self.context.optimize(s, value),
        }
    }

    /// Sequential in-place sweep; later states see earlier updates.
    pub(crate) fn gauss_seidel_sweep(&self, value: &mut [f64]) -> Result<f64> {
        let mut residual = 0.0_f64;
        for s in 0..self.context.mdp.num_states() {
            let decision = self.update(s, value)?;
            trace!("state {}: {} -> {}", s, value[s], decision.value);
            residual = residual.max((decision.value - value[s]).abs());
            value[s] = decision.value;
        }
        Ok(residual)
    }

    /// Parallel sweep from a frozen snapshot. Returns the per-state
    /// decisions, the next value function, and the residual.
    pub(crate) fn jacobi_sweep(&self, value: &[f64]) -> Result<(Vec<Decision>, Vec<f64>, f64)> {
        let decisions: Vec<Decision> = (0..self.context.mdp.num_states())
            .into_par_iter()
            .map(|s| self.update(s, value))
            .collect::<Result<_>>()?;
        let next: Vec<f64> = decisions.iter().map(|d| d.value).collect();
        let residual = residual_between(value, &next);
        Ok((decisions, next, residual))
    }

    /// Parallel fixed-policy sweep used by modified policy iteration.
    pub(crate) fn evaluation_sweep(
        &self,
        value: &[f64],
        choices: &[ActionChoice],
    ) -> Result<(Vec<f64>, f64)> {
        let next: Vec<f64> = (0..self.context.mdp.num_states())
            .into_par_iter()
            .map(|s| {
                self.context
                    .evaluate(s, value, &choices[s])
                    .map(|decision| decision.value)
            })
            .collect::<Result<_>>()?;
        let residual = residual_between(value, &next);
        Ok((next, residual))
    }

    /// Decision extraction from a finished value function; does not advance
    /// the iteration.
    pub(crate) fn extract(&self, value: &[f64]) -> Result<Vec<Decision>> {
        (0..self.context.mdp.num_states())
            .into_par_iter()
            .map(|s| self.update(s, value))
            .collect()
    }

    pub(crate) fn out_of_time(&self) -> bool {
        self.max_time
            .map(|budget| self.start.elapsed() >= budget)
            .unwrap_or(false)
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

fn residual_between(previous: &[f64], next: &[f64]) -> f64 {
    previous
        .iter()
        .zip(next.iter())
        .map(|(&a, &b)| (b - a).abs())
        .fold(0.0, f64::max)
}

/// Builds the result bundle from the final extraction pass.
pub(crate) fn assemble_solution(
    mdp: &Mdp,
    config: &SolveConfig,
    decisions: Vec<Decision>,
    value: Vec<f64>,
    residuals: Vec<f64>,
    iterations: usize,
    elapsed: Duration,
    converged: bool,
) -> Solution {
    let rectangularity = config.ambiguity.as_ref().map(|a| a.rectangularity);
    let nature = (rectangularity == Some(Rectangularity::Sa)).then(|| {
        decisions
            .iter()
            .map(|d| d.nature.clone().unwrap_or_default())
            .collect()
    });
    let budgets = (rectangularity == Some(Rectangularity::S)).then(|| {
        decisions
            .iter()
            .map(|d| d.budgets.clone().unwrap_or_default())
            .collect()
    });
    let num_actions: Vec<usize> = mdp.states().iter().map(|s| s.num_actions()).collect();
    let policy = Policy::from_choices(
        decisions.into_iter().map(|d| d.choice).collect(),
        &num_actions,
    );
    let residual = residuals.last().copied().unwrap_or(f64::INFINITY);
    Solution {
        value,
        policy,
        nature,
        budgets,
        residual,
        residuals,
        iterations,
        elapsed,
        converged,
    }
}
