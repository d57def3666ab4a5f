//! Linear programming support for the s-rectangular Bellman update.
//!
//! The joint optimizer in [`srect`] only needs a narrow interface: a linear
//! program in, a primal point with duals out. The [`LpSolver`] trait is that
//! seam; the default backend is the dense two-phase simplex in [`simplex`],
//! and tests may inject a stub.

pub mod simplex;
pub mod srect;

use std::fmt::Debug;

use num_traits::Float;

use crate::error::Result;

pub use simplex::SimplexSolver;

/// Sense of a single linear constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintSense {
    /// `coefficients . x <= rhs`
    Le,
    /// `coefficients . x == rhs`
    Eq,
}

/// One row of a linear program.
#[derive(Debug, Clone)]
pub struct Constraint<T>
where
    T: Float + Debug,
{
    pub coefficients: Vec<T>,
    pub sense: ConstraintSense,
    pub rhs: T,
}

/// A linear program `min c'x` subject to the given rows and `x >= 0`.
#[derive(Debug, Clone)]
pub struct LinearProgram<T>
where
    T: Float + Debug,
{
    /// The objective coefficients (`c` in `min c'x`).
    pub objective: Vec<T>,
    pub constraints: Vec<Constraint<T>>,
}

/// An optimal LP solution.
#[derive(Debug, Clone)]
pub struct LpSolution<T>
where
    T: Float + Debug,
{
    /// The optimal point.
    pub point: Vec<T>,
    /// The objective value at the optimal point.
    pub objective: T,
    /// One dual value per constraint row, oriented so that the dual of a
    /// `<=` row is the shadow price `dz/d(rhs)` (non-positive for a
    /// minimization).
    pub duals: Vec<T>,
    /// Number of pivots performed.
    pub iterations: usize,
}

/// The seam between the s-rectangular optimizer and its LP backend.
///
/// Implementations must report failure through
/// [`crate::Error::OptimizationInfeasible`] for infeasible or unbounded
/// programs; partial results are never returned.
pub trait LpSolver: Sync {
    fn solve(&self, lp: &LinearProgram<f64>) -> Result<LpSolution<f64>>;
}
