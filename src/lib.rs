//! Hierarchical composition of simulation units with connection resolution,
//! data transfer and matrix-free derivative propagation.
//!
//! A model is a tree of `Group`s (composites) and `Component`s (leaves).
//! `Problem::setup` resolves which output feeds each input, lays out shared
//! storage and builds transfer plans; `run` evaluates the tree and
//! `calc_gradient` computes total derivatives in forward or reverse mode.

pub mod analysis {
    pub mod topology;
}
pub mod connections;
pub mod display;
pub mod error;
pub mod options;
pub mod parallel;
pub mod problem;
pub mod solver;
pub mod store;
pub mod system;
pub mod transfer;

pub use connections::ConnectionMap;
pub use error::{ConfigurationError, Error, LookupError, Result};
pub use options::{FdForm, FdOptions, LinearOptions};
pub use problem::Problem;
pub use store::{Mode, VarValue, VecView, VecViewMut};
pub use system::{Component, Group, IndepVarComp, LeafKind, LeafModel, Partial, PartialJacobian, System};
