//! Data Transfer Engine: index plans and the kernels that execute them.
pub mod kernel;
pub mod plan;

pub use plan::{to_spans, DataTransfer, IndexSpan};
