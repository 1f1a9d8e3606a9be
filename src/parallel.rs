//! parallel.rs
//! Which units this process participates in.
//!
//! The core itself runs single-threaded per process. Distribution shows up
//! only as the activity flag consulted before every unit of work and as the
//! communicator handle a distributed `VectorStorage` would use for its
//! collective transfers.

use crate::store::types::is_descendant;
use std::collections::BTreeSet;
use std::fmt::Debug;

/// A process group handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Comm {
    pub rank: usize,
    pub size: usize,
}

impl Default for Comm {
    fn default() -> Self { Self { rank: 0, size: 1 } }
}

pub trait ProcessActivity: Debug {
    /// Whether the unit at `path` has a share of its storage on this process.
    fn is_active(&self, path: &str) -> bool;
    fn comm(&self) -> Comm;
}

/// Everything runs here.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialActivity;

impl ProcessActivity for SerialActivity {
    fn is_active(&self, _path: &str) -> bool { true }
    fn comm(&self) -> Comm { Comm::default() }
}

/// Marks chosen subtrees as living on another process.
#[derive(Debug, Clone, Default)]
pub struct ActivityMask {
    inactive: BTreeSet<String>,
    comm: Comm,
}

impl ActivityMask {
    pub fn new(comm: Comm) -> Self { Self { inactive: BTreeSet::new(), comm } }

    /// Deactivates `path` and everything below it.
    pub fn deactivate(mut self, path: impl Into<String>) -> Self {
        self.inactive.insert(path.into());
        self
    }
}

impl ProcessActivity for ActivityMask {
    fn is_active(&self, path: &str) -> bool {
        !self.inactive.iter().any(|p| path == p || is_descendant(path, p))
    }

    fn comm(&self) -> Comm { self.comm }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_covers_descendants_only() {
        let mask = ActivityMask::new(Comm { rank: 1, size: 2 }).deactivate("par:c1");
        assert!(!mask.is_active("par:c1"));
        assert!(!mask.is_active("par:c1:inner"));
        assert!(mask.is_active("par:c10"));
        assert!(mask.is_active("par"));
        assert!(mask.is_active(""));
        assert_eq!(mask.comm().size, 2);
    }

    #[test]
    fn test_serial_is_always_active() {
        assert!(SerialActivity.is_active("anything"));
        assert_eq!(SerialActivity.comm(), Comm { rank: 0, size: 1 });
    }
}
