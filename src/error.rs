//! error.rs
//! Configuration, lookup and runtime failures.

use thiserror::Error;

/// Problems with how a model was assembled. Always raised during setup,
/// before any numeric work happens, and never retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Promoted name '{name}' matches multiple unknowns: {candidates:?}")]
    AmbiguousPromotion { name: String, candidates: Vec<String> },
    #[error("no variable found for name '{name}' in {dict}")]
    Unresolved { name: String, dict: &'static str },
    #[error("setup() must be called before variables can be accessed")]
    NotSetUp,
    #[error("Group '{group}' already has a subsystem named '{name}'")]
    DuplicateSubsystem { group: String, name: String },
    #[error("System '{system}' already declares a variable named '{name}'")]
    DuplicateVariable { system: String, name: String },
    #[error("Invalid name '{name}': names may not be empty or contain the path separator")]
    InvalidName { name: String },
    #[error("System '{system}' promotes '{name}', but no such variable exists")]
    PromoteNotFound { system: String, name: String },
    #[error("Cannot connect '{src}' to '{tgt}': {reason}")]
    IncompatibleConnection { tgt: String, src: String, reason: String },
}

/// A runtime request for something that does not exist.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("Can't find variable '{name}' in {vector} vector in system '{system}'")]
    UnknownVariable { name: String, vector: String, system: String },
    #[error("'{0}' is not a valid vector name")]
    UnknownVector(String),
    #[error("No subsystem found at '{0}'")]
    UnknownSubsystem(String),
    #[error("Variable '{name}' is not {expected}")]
    KindMismatch { name: String, expected: &'static str },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("Jacobian block ({output}, {input}) of '{system}' has shape {found:?}, expected {expected:?}")]
    JacobianShape {
        system: String,
        output: String,
        input: String,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Linear solve failed: {0}")]
    LinearSolve(String),
    #[error("Unit '{path}' failed: {message}")]
    Unit { path: String, message: String },
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Convenience for leaf models reporting their own failures.
    pub fn unit(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Unit { path: path.into(), message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
