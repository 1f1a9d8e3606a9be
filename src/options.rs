//! options.rs
//! Serde-loadable settings for linear solves and finite differencing.

pub use crate::store::Mode;
use serde::{Deserialize, Serialize};

/// Settings of a composite's linear solve wrapper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearOptions {
    /// Direction used when the caller does not pick one.
    pub mode: Mode,
}

impl LinearOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FdForm {
    #[default]
    Forward,
    Central,
}

/// Per-leaf finite-difference settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FdOptions {
    /// Use finite differences even if the leaf supplies partials.
    pub force_fd: bool,
    pub step_size: f64,
    pub form: FdForm,
}

impl Default for FdOptions {
    fn default() -> Self {
        Self { force_fd: false, step_size: 1e-6, form: FdForm::Forward }
    }
}

impl FdOptions {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
