//! Finite Markov decision process representation.
//!
//! States and actions are dense integer indices. Each action owns one or more
//! weighted *outcomes*, where an outcome is a sparse transition over successor
//! states. Plain MDPs use a single outcome per action; robust MDPs may attach
//! several outcomes together with a nominal distribution over them.

use std::borrow::Cow;

use crate::error::{Error, Result};

/// Tolerance used when checking that probabilities sum to one.
pub(crate) const EPSILON: f64 = 1e-6;

/// How partially specified transition rows are treated before a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransitionPolicy {
    /// Reject any transition whose probabilities do not sum to 1 within
    /// tolerance.
    #[default]
    Reject,
    /// Rescale every transition (and outcome distribution) to sum to 1.
    Normalize,
}

/// A sparse probability distribution over successor states with a reward
/// attached to each transition.
///
/// Stored as three parallel arrays ordered by insertion. Probabilities may sum
/// to less than one while the model is under construction; see
/// [`TransitionPolicy`] for how such rows are resolved at solve time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    indices: Vec<usize>,
    probabilities: Vec<f64>,
    rewards: Vec<f64>,
}

impl Transition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a transition from `(successor, probability, reward)` triples.
    pub fn from_triples<I>(triples: I) -> Self
    where
        I: IntoIterator<Item = (usize, f64, f64)>,
    {
        let mut transition = Self::new();
        for (next, probability, reward) in triples {
            transition.add_sample(next, probability, reward);
        }
        transition
    }

    /// Adds a transition sample. A repeated successor state merges with the
    /// existing entry: probabilities add and rewards combine by a
    /// probability-weighted average.
    pub fn add_sample(&mut self, next: usize, probability: f64, reward: f64) {
        if let Some(pos) = self.indices.iter().position(|&i| i == next) {
            let old_p = self.probabilities[pos];
            let new_p = old_p + probability;
            if new_p.abs() > 0.0 {
                self.rewards[pos] = (self.rewards[pos] * old_p + reward * probability) / new_p;
            }
            self.probabilities[pos] = new_p;
        } else {
            self.indices.push(next);
            self.probabilities.push(probability);
            self.rewards.push(reward);
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn rewards(&self) -> &[f64] {
        &self.rewards
    }

    pub fn sum_probabilities(&self) -> f64 {
        self.probabilities.iter().sum()
    }

    /// Whether the probabilities form a distribution within tolerance.
    pub fn is_resolved(&self) -> bool {
        self.probabilities.iter().all(|&p| p >= 0.0)
            && (self.sum_probabilities() - 1.0).abs() < EPSILON
    }

    /// Rescales the probabilities to sum to one. A no-op for empty rows.
    pub fn normalize(&mut self) {
        let sum = self.sum_probabilities();
        if sum > 0.0 {
            for p in &mut self.probabilities {
                *p /= sum;
            }
        }
    }

    /// Expected one-step return `sum_i p_i (r_i + discount * value[s_i])`.
    pub fn value(&self, value_function: &[f64], discount: f64) -> f64 {
        self.value_with(value_function, discount, &self.probabilities)
    }

    /// Same as [`Transition::value`] but with substituted probabilities, used
    /// to evaluate a nature response over this transition's support.
    pub fn value_with(&self, value_function: &[f64], discount: f64, probabilities: &[f64]) -> f64 {
        debug_assert_eq!(probabilities.len(), self.len());
        self.indices
            .iter()
            .zip(self.rewards.iter())
            .zip(probabilities.iter())
            .map(|((&next, &reward), &p)| p * (reward + discount * value_function[next]))
            .sum()
    }

    /// Per-successor returns `r_i + discount * value[s_i]`, the `z` vector fed
    /// to nature's response.
    pub fn successor_values(&self, value_function: &[f64], discount: f64) -> Vec<f64> {
        self.indices
            .iter()
            .zip(self.rewards.iter())
            .map(|(&next, &reward)| reward + discount * value_function[next])
            .collect()
    }

    /// Probability-weighted mean reward of this transition.
    pub fn mean_reward(&self) -> f64 {
        let sum = self.sum_probabilities();
        if sum <= 0.0 {
            return 0.0;
        }
        self.probabilities
            .iter()
            .zip(self.rewards.iter())
            .map(|(&p, &r)| p * r)
            .sum::<f64>()
            / sum
    }
}

/// An action available in a state.
///
/// Holds one or more outcome transitions. A single outcome is the plain-MDP
/// case. With several outcomes the action is *augmented*: the nominal
/// distribution over outcomes (uniform unless set) becomes the baseline that
/// nature perturbs in robust solves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Action {
    outcomes: Vec<Transition>,
    distribution: Vec<f64>,
}

impl Action {
    pub fn new() -> Self {
        Self::default()
    }

    /// An action with a single outcome.
    pub fn plain(transition: Transition) -> Self {
        Action {
            outcomes: vec![transition],
            distribution: Vec::new(),
        }
    }

    pub fn outcomes(&self) -> &[Transition] {
        &self.outcomes
    }

    pub fn add_outcome(&mut self, transition: Transition) {
        self.outcomes.push(transition);
    }

    /// The single transition of a plain action; the first outcome when the
    /// action is augmented.
    pub fn transition(&self) -> Option<&Transition> {
        self.outcomes.first()
    }

    /// Whether this action carries more than one outcome.
    pub fn is_augmented(&self) -> bool {
        self.outcomes.len() > 1
    }

    /// Sets the nominal distribution over outcomes.
    pub fn set_distribution(&mut self, weights: Vec<f64>) -> Result<()> {
        if weights.len() != self.outcomes.len() {
            return Err(Error::InvalidDistribution(format!(
                "outcome distribution has {} entries for {} outcomes",
                weights.len(),
                self.outcomes.len()
            )));
        }
        if weights.iter().any(|&w| w < 0.0) {
            return Err(Error::InvalidDistribution(
                "outcome distribution has a negative entry".to_string(),
            ));
        }
        self.distribution = weights;
        Ok(())
    }

    /// Nominal distribution over outcomes; uniform when none was set.
    pub fn outcome_distribution(&self) -> Vec<f64> {
        if self.distribution.is_empty() {
            let n = self.outcomes.len();
            vec![1.0 / n as f64; n.max(1)]
        } else {
            self.distribution.clone()
        }
    }

    fn normalize(&mut self) {
        for outcome in &mut self.outcomes {
            outcome.normalize();
        }
        let sum: f64 = self.distribution.iter().sum();
        if sum > 0.0 {
            for w in &mut self.distribution {
                *w /= sum;
            }
        }
    }
}

/// A state: a set of actions. States without actions are terminal and carry
/// value zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    actions: Vec<Action>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, a: usize) -> Option<&Action> {
        self.actions.get(a)
    }

    pub fn num_actions(&self) -> usize {
        self.actions.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn add_action(&mut self, action: Action) {
        self.actions.push(action);
    }
}

/// A finite MDP: a dense vector of states.
///
/// Models are usually built incrementally with [`Mdp::add_transition`], which
/// grows states and actions on demand so records can arrive in any order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mdp {
    states: Vec<State>,
}

impl Mdp {
    pub fn new() -> Self {
        Self::default()
    }

    /// An MDP with `n` empty (terminal) states.
    pub fn with_states(n: usize) -> Self {
        Mdp {
            states: vec![State::new(); n],
        }
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn state(&self, s: usize) -> Option<&State> {
        self.states.get(s)
    }

    /// Records a `(from, action, to, probability, reward)` sample on the
    /// action's first outcome, creating missing states and actions.
    pub fn add_transition(
        &mut self,
        from: usize,
        action: usize,
        to: usize,
        probability: f64,
        reward: f64,
    ) {
        self.add_outcome_transition(from, action, 0, to, probability, reward);
    }

    /// Records a sample on a specific outcome of `(from, action)`, creating
    /// missing states, actions, and outcomes.
    pub fn add_outcome_transition(
        &mut self,
        from: usize,
        action: usize,
        outcome: usize,
        to: usize,
        probability: f64,
        reward: f64,
    ) {
        let top = from.max(to);
        if top >= self.states.len() {
            self.states.resize(top + 1, State::new());
        }
        let state = &mut self.states[from];
        while state.actions.len() <= action {
            state.actions.push(Action::new());
        }
        let act = &mut state.actions[action];
        while act.outcomes.len() <= outcome {
            act.outcomes.push(Transition::new());
        }
        act.outcomes[outcome].add_sample(to, probability, reward);
    }

    /// Sets the nominal outcome distribution of `(state, action)`.
    pub fn set_outcome_distribution(
        &mut self,
        state: usize,
        action: usize,
        weights: Vec<f64>,
    ) -> Result<()> {
        let act = self
            .states
            .get_mut(state)
            .and_then(|st| st.actions.get_mut(action))
            .ok_or_else(|| {
                Error::ConfigurationError(format!("no action {} in state {}", action, state))
            })?;
        act.set_distribution(weights)
    }

    /// Fail-fast structural check run before any solve.
    ///
    /// Verifies that every action has at least one outcome and that every
    /// transition targets a known state, has non-negative probabilities, and,
    /// under [`TransitionPolicy::Reject`], sums to one within tolerance.
    /// Under [`TransitionPolicy::Normalize`] rows only need a positive
    /// probability mass.
    pub fn validate(&self, policy: TransitionPolicy) -> Result<()> {
        for (s, state) in self.states.iter().enumerate() {
            for (a, action) in state.actions.iter().enumerate() {
                // grow-on-demand construction can leave lower action indices
                // behind with no outcomes at all
                if action.outcomes.is_empty() {
                    return Err(Error::InvalidDistribution(format!(
                        "state {}, action {} has no outcomes",
                        s, a
                    )));
                }
                for (o, outcome) in action.outcomes.iter().enumerate() {
                    if outcome.is_empty() {
                        return Err(Error::InvalidDistribution(format!(
                            "state {}, action {}, outcome {} has no transitions",
                            s, a, o
                        )));
                    }
                    if let Some(&bad) = outcome.indices().iter().find(|&&i| i >= self.states.len())
                    {
                        return Err(Error::ConfigurationError(format!(
                            "state {}, action {} targets unknown state {}",
                            s, a, bad
                        )));
                    }
                    if outcome.probabilities().iter().any(|&p| p < 0.0) {
                        return Err(Error::InvalidDistribution(format!(
                            "state {}, action {}, outcome {} has a negative probability",
                            s, a, o
                        )));
                    }
                    let sum = outcome.sum_probabilities();
                    match policy {
                        TransitionPolicy::Reject if (sum - 1.0).abs() >= EPSILON => {
                            return Err(Error::InvalidDistribution(format!(
                                "state {}, action {}, outcome {} sums to {}",
                                s, a, o, sum
                            )));
                        }
                        TransitionPolicy::Normalize if sum <= EPSILON => {
                            return Err(Error::InvalidDistribution(format!(
                                "state {}, action {}, outcome {} has no probability mass",
                                s, a, o
                            )));
                        }
                        _ => {}
                    }
                }
                if action.is_augmented() {
                    let dist = action.outcome_distribution();
                    let sum: f64 = dist.iter().sum();
                    if policy == TransitionPolicy::Reject && (sum - 1.0).abs() >= EPSILON {
                        return Err(Error::InvalidDistribution(format!(
                            "state {}, action {} outcome distribution sums to {}",
                            s, a, sum
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns the model with all rows resolved to proper distributions.
    /// Borrows under [`TransitionPolicy::Reject`]; clones and rescales under
    /// [`TransitionPolicy::Normalize`].
    pub fn resolved(&self, policy: TransitionPolicy) -> Cow<'_, Mdp> {
        match policy {
            TransitionPolicy::Reject => Cow::Borrowed(self),
            TransitionPolicy::Normalize => {
                let mut mdp = self.clone();
                for state in &mut mdp.states {
                    for action in &mut state.actions {
                        action.normalize();
                    }
                }
                Cow::Owned(mdp)
            }
        }
    }
}

/// A fixed or optimized choice of action in one state: either a single action
/// index or a distribution over the state's actions.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionChoice {
    Fixed(usize),
    Randomized(Vec<f64>),
}

/// A policy over all states, produced once per solve and immutable afterward.
#[derive(Debug, Clone, PartialEq)]
pub enum Policy {
    /// One action index per state.
    Deterministic(Vec<usize>),
    /// One distribution over actions per state.
    Randomized(Vec<Vec<f64>>),
}

impl Policy {
    pub fn len(&self) -> usize {
        match self {
            Policy::Deterministic(actions) => actions.len(),
            Policy::Randomized(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The choice this policy makes in state `s`.
    pub fn choice(&self, s: usize) -> ActionChoice {
        match self {
            Policy::Deterministic(actions) => ActionChoice::Fixed(actions[s]),
            Policy::Randomized(rows) => ActionChoice::Randomized(rows[s].clone()),
        }
    }

    /// Per-state pins suitable for [`crate::solver::SolveConfig::fixed_policy`],
    /// fixing every state to this policy's choice.
    pub fn pins(&self) -> Vec<Option<ActionChoice>> {
        (0..self.len()).map(|s| Some(self.choice(s))).collect()
    }

    /// Assembles a policy from per-state choices, staying deterministic when
    /// no state requires randomization. `num_actions` gives each state's
    /// action count so fixed choices mixed into a randomized policy pad to
    /// full rows; terminal states yield empty rows.
    pub(crate) fn from_choices(choices: Vec<ActionChoice>, num_actions: &[usize]) -> Policy {
        if choices
            .iter()
            .all(|c| matches!(c, ActionChoice::Fixed(_)))
        {
            Policy::Deterministic(
                choices
                    .into_iter()
                    .map(|c| match c {
                        ActionChoice::Fixed(a) => a,
                        ActionChoice::Randomized(_) => unreachable!(),
                    })
                    .collect(),
            )
        } else {
            Policy::Randomized(
                choices
                    .into_iter()
                    .zip(num_actions.iter())
                    .map(|(c, &count)| match c {
                        ActionChoice::Fixed(a) => {
                            let mut row = vec![0.0; count];
                            if let Some(slot) = row.get_mut(a) {
                                *slot = 1.0;
                            }
                            row
                        }
                        ActionChoice::Randomized(row) => row,
                    })
                    .collect(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_add_sample_merges_duplicates() {
        let mut t = Transition::new();
        t.add_sample(3, 0.2, 1.0);
        t.add_sample(5, 0.3, 2.0);
        t.add_sample(3, 0.2, 3.0);

        assert_eq!(t.len(), 2);
        assert_eq!(t.indices(), &[3, 5]);
        assert_relative_eq!(t.probabilities()[0], 0.4);
        // reward merges by probability-weighted average
        assert_relative_eq!(t.rewards()[0], 2.0);
    }

    #[test]
    fn test_normalize_partial_row() {
        let mut t = Transition::from_triples([(0, 0.2, 1.0), (1, 0.3, 0.0)]);
        assert!(!t.is_resolved());
        t.normalize();
        assert!(t.is_resolved());
        assert_relative_eq!(t.probabilities()[0], 0.4);
        assert_relative_eq!(t.probabilities()[1], 0.6);
    }

    #[test]
    fn test_transition_value() {
        let t = Transition::from_triples([(0, 0.5, 2.0), (1, 0.5, 0.0)]);
        let value = vec![10.0, 20.0];
        // 0.5*(2 + 0.9*10) + 0.5*(0 + 0.9*20)
        assert_relative_eq!(t.value(&value, 0.9), 0.5 * 11.0 + 0.5 * 18.0);
    }

    #[test]
    fn test_add_transition_grows_model() {
        let mut mdp = Mdp::new();
        mdp.add_transition(0, 1, 4, 1.0, 2.5);
        assert_eq!(mdp.num_states(), 5);
        assert_eq!(mdp.states()[0].num_actions(), 2);
        assert!(mdp.states()[4].is_terminal());
    }

    #[test]
    fn test_validate_rejects_partial_rows() {
        let mut mdp = Mdp::new();
        mdp.add_transition(0, 0, 0, 0.5, 1.0);
        assert!(matches!(
            mdp.validate(TransitionPolicy::Reject),
            Err(Error::InvalidDistribution(_))
        ));
        assert!(mdp.validate(TransitionPolicy::Normalize).is_ok());
    }

    #[test]
    fn test_validate_rejects_action_without_outcomes() {
        // adding only action 1 leaves action 0 behind with no outcomes
        let mut mdp = Mdp::new();
        mdp.add_transition(0, 1, 0, 1.0, -5.0);
        assert!(matches!(
            mdp.validate(TransitionPolicy::Reject),
            Err(Error::InvalidDistribution(_))
        ));
        assert!(matches!(
            mdp.validate(TransitionPolicy::Normalize),
            Err(Error::InvalidDistribution(_))
        ));
    }

    #[test]
    fn test_validate_rejects_negative_probability() {
        let mut mdp = Mdp::new();
        mdp.add_transition(0, 0, 0, 1.5, 1.0);
        mdp.add_transition(0, 0, 1, -0.5, 1.0);
        assert!(matches!(
            mdp.validate(TransitionPolicy::Normalize),
            Err(Error::InvalidDistribution(_))
        ));
    }

    #[test]
    fn test_resolved_normalizes_clone() {
        let mut mdp = Mdp::new();
        mdp.add_transition(0, 0, 0, 0.5, 1.0);
        let resolved = mdp.resolved(TransitionPolicy::Normalize);
        let t = resolved.states()[0].actions()[0].transition().unwrap();
        assert!(t.is_resolved());
        // the original is untouched
        assert!(!mdp.states()[0].actions()[0].transition().unwrap().is_resolved());
    }

    #[test]
    fn test_policy_from_choices() {
        let policy =
            Policy::from_choices(vec![ActionChoice::Fixed(1), ActionChoice::Fixed(0)], &[2, 2]);
        assert_eq!(policy, Policy::Deterministic(vec![1, 0]));

        let mixed = Policy::from_choices(
            vec![
                ActionChoice::Fixed(1),
                ActionChoice::Randomized(vec![0.5, 0.5]),
            ],
            &[2, 2],
        );
        match mixed {
            Policy::Randomized(rows) => {
                assert_eq!(rows[0], vec![0.0, 1.0]);
                assert_eq!(rows[1], vec![0.5, 0.5]);
            }
            _ => panic!("expected a randomized policy"),
        }
    }

    #[test]
    fn test_mixed_policy_pads_to_action_count() {
        // a fixed choice of action 0 in a three-action state must still
        // produce a full-length row
        let mixed = Policy::from_choices(
            vec![
                ActionChoice::Randomized(vec![0.5, 0.5]),
                ActionChoice::Fixed(0),
            ],
            &[2, 3],
        );
        match mixed {
            Policy::Randomized(rows) => {
                assert_eq!(rows[1], vec![1.0, 0.0, 0.0]);
            }
            _ => panic!("expected a randomized policy"),
        }
    }
}
