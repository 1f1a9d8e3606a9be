//! Read-only renderings of a finalized model.
pub mod dump;
