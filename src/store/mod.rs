//! Variable metadata, dictionaries and the storage they describe.
pub mod registry;
pub mod types;
pub mod vector;
pub mod view;

pub use registry::VarRegistry;
pub use types::{Mode, VarId, VarMeta, VarValue, SEP};
pub use vector::{DataVector, VectorStorage};
pub use view::{VecView, VecViewMut, ViewSpec};
