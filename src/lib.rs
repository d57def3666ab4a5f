//! Robust Markov decision process solvers.
//!
//! Models are finite MDPs with sparse transitions. Solves come in three
//! flavors: plain (the nominal model is trusted), robust (an adversarial
//! nature perturbs transition probabilities within an ambiguity set), and
//! optimistic (nature cooperates). Ambiguity sets are weighted L1 or L∞
//! balls around the nominal distributions, budgeted either per
//! `(state, action)` or jointly per state.
//!
//! ```
//! use rmdp::{value_iteration, Mdp, SolveConfig};
//!
//! let mut mdp = Mdp::new();
//! mdp.add_transition(0, 0, 0, 1.0, 5.0);
//! let solution = value_iteration(&mdp, &SolveConfig::default()).unwrap();
//! assert!((solution.value[0] - 50.0).abs() < 1e-2);
//! ```

pub mod bellman;
pub mod error;
pub mod model;
pub mod nature;
pub mod optimization;
pub mod solver;

pub use error::{Error, Result};
pub use model::{Action, ActionChoice, Mdp, Policy, State, Transition, TransitionPolicy};
pub use nature::{Ambiguity, Budgets, Direction, NatureModel, Rectangularity};
pub use solver::{
    modified_policy_iteration, value_iteration, Objective, Solution, SolveConfig, Sweep,
};
