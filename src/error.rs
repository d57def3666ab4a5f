use thiserror::Error;

/// Errors raised while validating models or running a solve.
///
/// Numerical non-convergence is intentionally absent: exhausting an iteration
/// or time budget is reported through [`crate::solver::Solution::converged`],
/// never as an error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A transition or policy row is not a valid probability distribution.
    #[error("invalid probability distribution: {0}")]
    InvalidDistribution(String),

    /// A negative ambiguity budget was supplied.
    #[error("invalid ambiguity budget {budget}: must be non-negative")]
    InvalidBudget { budget: f64 },

    /// Nature's response has no feasible point under the stated budget and
    /// support.
    #[error("no feasible nature response: {0}")]
    InfeasibleAmbiguity(String),

    /// The linear program backing an s-rectangular update failed to solve.
    #[error("linear program failed: {0}")]
    OptimizationInfeasible(String),

    /// An unsupported combination of model, objective, and solver options.
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
