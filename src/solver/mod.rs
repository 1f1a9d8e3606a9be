//! Pluggable solvers driving a composite: nonlinear evaluation and linear
//! solves against the matrix-free operator.
pub mod linear;
pub mod nonlinear;

pub use linear::{DirectSolver, LinearOperator, LinearSolver};
pub use nonlinear::{NonlinearSolver, RunOnce};
