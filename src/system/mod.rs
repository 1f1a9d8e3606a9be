//! The composition tree.
//!
//! A unit is either a leaf (`Component`) or a composite (`Group`). Every
//! operation the orchestrators perform branches on exactly these two cases,
//! so the tree is a closed enum rather than a trait object hierarchy.
pub mod component;
pub mod group;
pub mod jacobian;
pub mod linear;
pub mod manager;

pub use component::{Component, IndepVarComp, LeafKind, LeafModel};
pub use group::{Group, TransferKey, TransferPair};
pub use jacobian::{JacobianCache, Partial, PartialJacobian};
pub use linear::{GroupOperator, LinearContext};
pub use manager::{VarManager, VectorKind};

use crate::error::Result;
use crate::parallel::ProcessActivity;
use crate::store::{Mode, VarRegistry};
use std::ops::Range;

#[derive(Debug)]
pub enum System {
    Component(Component),
    Group(Group),
}

impl From<Component> for System {
    fn from(c: Component) -> Self { System::Component(c) }
}

impl From<Group> for System {
    fn from(g: Group) -> Self { System::Group(g) }
}

impl System {
    pub fn name(&self) -> &str {
        match self {
            System::Component(c) => &c.name,
            System::Group(g) => &g.name,
        }
    }

    pub fn pathname(&self) -> &str {
        match self {
            System::Component(c) => &c.pathname,
            System::Group(g) => &g.pathname,
        }
    }

    pub fn promotes(&self) -> &[String] {
        match self {
            System::Component(c) => &c.promotes,
            System::Group(g) => &g.promotes,
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            System::Component(c) => c.active,
            System::Group(g) => g.active,
        }
    }

    pub fn req_procs(&self) -> (usize, Option<usize>) {
        match self {
            System::Component(c) => c.req_procs(),
            System::Group(g) => g.req_procs(),
        }
    }

    pub fn u_range(&self) -> Range<usize> {
        match self {
            System::Component(c) => c.u_range(),
            System::Group(g) => g.u_range(),
        }
    }

    pub fn p_range(&self) -> Range<usize> {
        match self {
            System::Component(c) => c.p_range(),
            System::Group(g) => g.p_range(),
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            System::Group(g) => Some(g),
            System::Component(_) => None,
        }
    }

    pub fn as_component(&self) -> Option<&Component> {
        match self {
            System::Component(c) => Some(c),
            System::Group(_) => None,
        }
    }

    fn set_identity(&mut self, name: &str, promotes: Vec<String>) {
        let (n, p) = match self {
            System::Component(c) => (&mut c.name, &mut c.promotes),
            System::Group(g) => (&mut g.name, &mut g.promotes),
        };
        *n = name.to_string();
        *p = promotes;
    }

    fn setup_paths(&mut self, parent: &str) {
        match self {
            System::Component(c) => c.pathname = crate::store::types::join_path(parent, &c.name),
            System::Group(g) => g.setup_paths(parent),
        }
    }

    fn setup_activity(&mut self, activity: &dyn ProcessActivity, parent_active: bool) {
        match self {
            System::Component(c) => c.active = parent_active && activity.is_active(&c.pathname),
            System::Group(g) => g.setup_activity(activity, parent_active),
        }
    }

    fn setup_variables(&mut self) -> Result<(VarRegistry, VarRegistry)> {
        match self {
            System::Component(c) => c.setup_variables(),
            System::Group(g) => g.setup_variables(),
        }
    }

    fn setup_vectors(&mut self, vm: &VarManager) {
        match self {
            System::Component(c) => c.setup_vectors(vm),
            System::Group(g) => g.setup_vectors(vm),
        }
    }

    pub fn solve_nonlinear(&self, vm: &mut VarManager) -> Result<()> {
        match self {
            System::Component(c) => c.solve_nonlinear(vm),
            System::Group(g) => g.solve_nonlinear(vm),
        }
    }

    pub fn apply_nonlinear(&self, vm: &mut VarManager) -> Result<()> {
        match self {
            System::Component(c) => c.apply_nonlinear(vm),
            System::Group(g) => g.apply_nonlinear(vm),
        }
    }

    /// Delegating application: a leaf's local operator or a composite's
    /// recursive one. Identity terms are added by the enclosing composite.
    pub fn apply_linear(&self, vm: &mut VarManager, mode: Mode) -> Result<()> {
        match self {
            System::Component(c) => c.apply_linear(vm, mode),
            System::Group(g) => g.apply_linear(vm, mode),
        }
    }

    pub fn linearize(&mut self, vm: &VarManager) -> Result<()> {
        match self {
            System::Component(c) => c.linearize(vm),
            System::Group(g) => g.linearize(vm),
        }
    }
}
