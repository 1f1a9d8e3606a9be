//! nonlinear.rs
//! Drivers for a composite's nonlinear evaluation.

use crate::error::Result;
use crate::system::{Group, VarManager};
use std::fmt::Debug;

pub trait NonlinearSolver: Debug {
    fn solve(&self, group: &Group, vm: &mut VarManager) -> Result<()>;

    /// Whether the solver makes exactly one pass over the children. Such a
    /// solver cannot converge a feedback cycle.
    fn single_pass(&self) -> bool { false }
}

/// Runs the children once, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOnce;

impl NonlinearSolver for RunOnce {
    fn solve(&self, group: &Group, vm: &mut VarManager) -> Result<()> {
        group.children_solve_nonlinear(vm)
    }

    fn single_pass(&self) -> bool { true }
}
