//! Per-state Bellman updates.
//!
//! One update combines the decision maker's action choice with, optionally,
//! nature's response over the chosen ambiguity set. The solver loops in
//! [`crate::solver`] apply these updates across all states per sweep; the
//! updates themselves never mutate the value function.

use crate::error::{Error, Result};
use crate::model::{Action, ActionChoice, Mdp};
use crate::nature::{self, Ambiguity, Direction, Rectangularity};
use crate::optimization::{srect, LpSolver};

/// The outcome of updating a single state.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// The updated state value.
    pub value: f64,
    /// The chosen action (or distribution over actions).
    pub choice: ActionChoice,
    /// Nature's distribution for the chosen action, when the update was
    /// sa-rectangular robust or optimistic.
    pub nature: Option<Vec<f64>>,
    /// Realized per-action budget allocation of an s-rectangular update.
    pub budgets: Option<Vec<f64>>,
}

impl Decision {
    fn terminal() -> Self {
        Decision {
            value: 0.0,
            choice: ActionChoice::Fixed(0),
            nature: None,
            budgets: None,
        }
    }
}

/// Shared inputs of every update in one sweep.
pub struct UpdateContext<'a> {
    pub mdp: &'a Mdp,
    pub discount: f64,
    pub ambiguity: Option<&'a Ambiguity>,
    pub direction: Option<Direction>,
    pub lp: &'a dyn LpSolver,
}

impl UpdateContext<'_> {
    /// Optimizing update: the decision maker maximizes over actions, nature
    /// responds within the configured ambiguity set. Ties between actions
    /// break toward the lowest index.
    pub fn optimize(&self, s: usize, value: &[f64]) -> Result<Decision> {
        let state = &self.mdp.states()[s];
        if state.is_terminal() {
            return Ok(Decision::terminal());
        }
        if let Some(ambiguity) = self.ambiguity {
            if ambiguity.rectangularity == Rectangularity::S {
                return self.optimize_srect(s, value, None);
            }
        }

        let mut best: Option<(f64, usize, Option<Vec<f64>>)> = None;
        for (a, action) in state.actions().iter().enumerate() {
            let (objective, response) = self.action_value(s, a, action, value)?;
            let improves = match &best {
                None => true,
                Some((incumbent, _, _)) => objective > *incumbent,
            };
            if improves {
                best = Some((objective, a, response));
            }
        }
        // states checked non-terminal above
        let (value, action, response) = best.ok_or_else(|| {
            Error::ConfigurationError(format!("state {} has no actions", s))
        })?;
        Ok(Decision {
            value,
            choice: ActionChoice::Fixed(action),
            nature: response,
            budgets: None,
        })
    }

    /// Evaluation update: the action choice is pinned, nature still responds.
    pub fn evaluate(&self, s: usize, value: &[f64], choice: &ActionChoice) -> Result<Decision> {
        let state = &self.mdp.states()[s];
        if state.is_terminal() {
            return Ok(Decision::terminal());
        }
        if let Some(ambiguity) = self.ambiguity {
            if ambiguity.rectangularity == Rectangularity::S {
                let pinned = match choice {
                    ActionChoice::Fixed(a) => {
                        let mut row = vec![0.0; state.num_actions()];
                        row[*a] = 1.0;
                        row
                    }
                    ActionChoice::Randomized(row) => row.clone(),
                };
                return self.optimize_srect(s, value, Some(pinned));
            }
        }

        match choice {
            ActionChoice::Fixed(a) => {
                let action = state.action(*a).ok_or_else(|| {
                    Error::ConfigurationError(format!(
                        "policy picks action {} in state {} which has {} actions",
                        a,
                        s,
                        state.num_actions()
                    ))
                })?;
                let (objective, response) = self.action_value(s, *a, action, value)?;
                Ok(Decision {
                    value: objective,
                    choice: choice.clone(),
                    nature: response,
                    budgets: None,
                })
            }
            ActionChoice::Randomized(row) => {
                if row.len() != state.num_actions() {
                    return Err(Error::InvalidDistribution(format!(
                        "policy row for state {} has {} entries for {} actions",
                        s,
                        row.len(),
                        state.num_actions()
                    )));
                }
                let mut total = 0.0;
                for (a, (&weight, action)) in row.iter().zip(state.actions()).enumerate() {
                    if weight <= 0.0 {
                        continue;
                    }
                    let (objective, _) = self.action_value(s, a, action, value)?;
                    total += weight * objective;
                }
                Ok(Decision {
                    value: total,
                    choice: choice.clone(),
                    nature: None,
                    budgets: None,
                })
            }
        }
    }

    /// Value of one action: plain expectation, or nature's realized objective
    /// under an sa-rectangular ambiguity set. Augmented actions route the
    /// response over the outcome distribution instead of the successor
    /// distribution.
    fn action_value(
        &self,
        s: usize,
        a: usize,
        action: &Action,
        value: &[f64],
    ) -> Result<(f64, Option<Vec<f64>>)> {
        let ambiguity = match self.ambiguity {
            None => return Ok((self.plain_action_value(action, value), None)),
            Some(ambiguity) => ambiguity,
        };
        let direction = self.direction.unwrap_or(Direction::Worst);
        let budget = ambiguity.budgets.budget(s, a)?;
        let weights = ambiguity.weights_for(s, a);

        if action.is_augmented() {
            let baseline = action.outcome_distribution();
            let values: Vec<f64> = action
                .outcomes()
                .iter()
                .map(|outcome| outcome.value(value, self.discount))
                .collect();
            let response =
                nature::respond(ambiguity.model, &baseline, &values, budget, weights, direction)
                    .map_err(|e| contextualize(e, s, a))?;
            Ok((response.objective, Some(response.distribution)))
        } else {
            // non-augmented actions always hold exactly one outcome
            let transition = action.transition().ok_or_else(|| {
                Error::ConfigurationError(format!("state {}, action {} has no outcomes", s, a))
            })?;
            let values = transition.successor_values(value, self.discount);
            let response = nature::respond(
                ambiguity.model,
                transition.probabilities(),
                &values,
                budget,
                weights,
                direction,
            )
            .map_err(|e| contextualize(e, s, a))?;
            Ok((response.objective, Some(response.distribution)))
        }
    }

    fn plain_action_value(&self, action: &Action, value: &[f64]) -> f64 {
        if action.is_augmented() {
            action
                .outcome_distribution()
                .iter()
                .zip(action.outcomes())
                .map(|(&weight, outcome)| weight * outcome.value(value, self.discount))
                .sum()
        } else {
            action
                .transition()
                .map_or(0.0, |t| t.value(value, self.discount))
        }
    }

    fn optimize_srect(
        &self,
        s: usize,
        value: &[f64],
        pinned: Option<Vec<f64>>,
    ) -> Result<Decision> {
        let state = &self.mdp.states()[s];
        // the joint LP assumes one nominal distribution per action
        let ambiguity = self.ambiguity.ok_or_else(|| {
            Error::ConfigurationError("s-rectangular update without an ambiguity set".to_string())
        })?;
        if self.direction == Some(Direction::Best) {
            return Err(Error::ConfigurationError(
                "the optimistic objective requires sa-rectangular budgets".to_string(),
            ));
        }
        let mut z = Vec::with_capacity(state.num_actions());
        let mut pbar = Vec::with_capacity(state.num_actions());
        for (a, action) in state.actions().iter().enumerate() {
            if action.is_augmented() {
                return Err(Error::ConfigurationError(format!(
                    "state {}, action {} has outcomes, unsupported with shared budgets",
                    s, a
                )));
            }
            let transition = action.transition().ok_or_else(|| {
                Error::ConfigurationError(format!("state {}, action {} has no outcomes", s, a))
            })?;
            z.push(transition.successor_values(value, self.discount));
            pbar.push(transition.probabilities().to_vec());
        }
        let weights: Option<Vec<Vec<f64>>> =
            ambiguity.weights.as_ref().and_then(|w| w.get(s)).cloned();
        let outcome = srect::solve(
            self.lp,
            ambiguity.model,
            &z,
            &pbar,
            ambiguity.budgets.state_budget(s)?,
            weights.as_deref(),
            pinned.as_deref(),
        )?;
        Ok(Decision {
            value: outcome.objective,
            choice: ActionChoice::Randomized(outcome.policy),
            nature: None,
            budgets: Some(outcome.budgets),
        })
    }
}

fn contextualize(error: Error, s: usize, a: usize) -> Error {
    match error {
        Error::InfeasibleAmbiguity(reason) => Error::InfeasibleAmbiguity(format!(
            "state {}, action {}: {}",
            s, a, reason
        )),
        other => other,
    }
}

/// Plain q-values of one state for a given value function: one entry per
/// action, `r(s,a) + discount * E[value]`.
pub fn state_action_values(mdp: &Mdp, s: usize, value: &[f64], discount: f64) -> Vec<f64> {
    mdp.states()[s]
        .actions()
        .iter()
        .map(|action| {
            if action.is_augmented() {
                action
                    .outcome_distribution()
                    .iter()
                    .zip(action.outcomes())
                    .map(|(&w, outcome)| w * outcome.value(value, discount))
                    .sum()
            } else {
                action.transition().map_or(0.0, |t| t.value(value, discount))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Mdp;
    use crate::nature::NatureModel;
    use crate::optimization::SimplexSolver;
    use approx::assert_relative_eq;

    fn two_action_mdp() -> Mdp {
        // state 0: action 0 self-loops with reward 1, action 1 moves to the
        // rewarding state 1; state 1 self-loops with reward 2
        let mut mdp = Mdp::new();
        mdp.add_transition(0, 0, 0, 1.0, 1.0);
        mdp.add_transition(0, 1, 1, 1.0, 0.0);
        mdp.add_transition(1, 0, 1, 1.0, 2.0);
        mdp
    }

    fn context<'a>(
        mdp: &'a Mdp,
        ambiguity: Option<&'a Ambiguity>,
        direction: Option<Direction>,
        lp: &'a SimplexSolver,
    ) -> UpdateContext<'a> {
        UpdateContext {
            mdp,
            discount: 0.9,
            ambiguity,
            direction,
            lp,
        }
    }

    #[test]
    fn test_plain_update_prefers_best_action() {
        let mdp = two_action_mdp();
        let lp = SimplexSolver::default();
        let ctx = context(&mdp, None, None, &lp);
        let value = vec![0.0, 10.0];
        let decision = ctx.optimize(0, &value).unwrap();
        // action 1 reaches value 10: 0 + 0.9 * 10 = 9 beats 1 + 0
        assert_relative_eq!(decision.value, 9.0);
        assert_eq!(decision.choice, ActionChoice::Fixed(1));
        assert!(decision.nature.is_none());
    }

    #[test]
    fn test_tie_breaks_to_lowest_action() {
        let mut mdp = Mdp::new();
        mdp.add_transition(0, 0, 0, 1.0, 1.0);
        mdp.add_transition(0, 1, 0, 1.0, 1.0);
        let lp = SimplexSolver::default();
        let ctx = context(&mdp, None, None, &lp);
        let decision = ctx.optimize(0, &[0.0]).unwrap();
        assert_eq!(decision.choice, ActionChoice::Fixed(0));
    }

    #[test]
    fn test_robust_update_degrades_value() {
        let mut mdp = Mdp::new();
        mdp.add_transition(0, 0, 1, 0.5, 10.0);
        mdp.add_transition(0, 0, 2, 0.5, 0.0);
        mdp.add_transition(1, 0, 1, 1.0, 0.0);
        mdp.add_transition(2, 0, 2, 1.0, 0.0);
        let lp = SimplexSolver::default();
        let ambiguity = Ambiguity::sa(NatureModel::L1, 0.5);
        let value = vec![0.0; 3];

        let plain = context(&mdp, None, None, &lp).optimize(0, &value).unwrap();
        let robust = context(&mdp, Some(&ambiguity), Some(Direction::Worst), &lp)
            .optimize(0, &value)
            .unwrap();
        assert_relative_eq!(plain.value, 5.0);
        // a quarter of the mass moves off the rewarding successor
        assert_relative_eq!(robust.value, 2.5);
        let response = robust.nature.unwrap();
        assert_relative_eq!(response[0], 0.25);
        assert_relative_eq!(response[1], 0.75);
    }

    #[test]
    fn test_optimistic_update_improves_value() {
        let mut mdp = Mdp::new();
        mdp.add_transition(0, 0, 1, 0.5, 10.0);
        mdp.add_transition(0, 0, 2, 0.5, 0.0);
        mdp.add_transition(1, 0, 1, 1.0, 0.0);
        mdp.add_transition(2, 0, 2, 1.0, 0.0);
        let lp = SimplexSolver::default();
        let ambiguity = Ambiguity::sa(NatureModel::L1, 0.5);
        let optimistic = context(&mdp, Some(&ambiguity), Some(Direction::Best), &lp)
            .optimize(0, &[0.0; 3])
            .unwrap();
        assert_relative_eq!(optimistic.value, 7.5);
    }

    #[test]
    fn test_outcome_augmented_action() {
        // one action, two outcomes: a rewarding and a neutral transition
        let mut mdp = Mdp::new();
        mdp.add_outcome_transition(0, 0, 0, 0, 1.0, 4.0);
        mdp.add_outcome_transition(0, 0, 1, 0, 1.0, 0.0);
        let lp = SimplexSolver::default();

        let plain = context(&mdp, None, None, &lp).optimize(0, &[0.0]).unwrap();
        assert_relative_eq!(plain.value, 2.0);

        // nature shifts outcome weight onto the neutral outcome
        let ambiguity = Ambiguity::sa(NatureModel::L1, 1.0);
        let robust = context(&mdp, Some(&ambiguity), Some(Direction::Worst), &lp)
            .optimize(0, &[0.0])
            .unwrap();
        assert_relative_eq!(robust.value, 0.0);
    }

    #[test]
    fn test_evaluation_pins_action() {
        let mdp = two_action_mdp();
        let lp = SimplexSolver::default();
        let ctx = context(&mdp, None, None, &lp);
        let value = vec![0.0, 10.0];
        let decision = ctx
            .evaluate(0, &value, &ActionChoice::Fixed(0))
            .unwrap();
        assert_relative_eq!(decision.value, 1.0);

        let randomized = ctx
            .evaluate(0, &value, &ActionChoice::Randomized(vec![0.5, 0.5]))
            .unwrap();
        assert_relative_eq!(randomized.value, 5.0);
    }

    #[test]
    fn test_srect_update_returns_randomized_choice() {
        let mut mdp = Mdp::new();
        mdp.add_transition(0, 0, 1, 0.9, 6.0);
        mdp.add_transition(0, 0, 2, 0.1, 0.0);
        mdp.add_transition(0, 1, 1, 0.1, 0.0);
        mdp.add_transition(0, 1, 2, 0.9, 6.0);
        mdp.add_transition(1, 0, 1, 1.0, 0.0);
        mdp.add_transition(2, 0, 2, 1.0, 0.0);
        let lp = SimplexSolver::default();
        let ambiguity = Ambiguity::s(NatureModel::L1, 0.5);
        let decision = context(&mdp, Some(&ambiguity), Some(Direction::Worst), &lp)
            .optimize(0, &[0.0; 3])
            .unwrap();
        match decision.choice {
            ActionChoice::Randomized(d) => {
                assert_relative_eq!(d[0], 0.5, epsilon = 1e-6);
                assert_relative_eq!(d[1], 0.5, epsilon = 1e-6);
            }
            other => panic!("expected a randomized choice, got {:?}", other),
        }
        assert!(decision.budgets.is_some());
    }

    #[test]
    fn test_state_action_values() {
        let mdp = two_action_mdp();
        let q = state_action_values(&mdp, 0, &[0.0, 10.0], 0.9);
        assert_relative_eq!(q[0], 1.0);
        assert_relative_eq!(q[1], 9.0);
    }
}
