//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};

/// Unique identifier for membranes in the arena
///
/// Ids are allocated sequentially by [`crate::system::MembraneSystem`] and are
/// never reused, so a tunnel holding the id of a dissolved membrane stays a
/// valid (dead) reference until the tunnel itself is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembraneId(pub u32);

impl MembraneId {
    /// Placeholder id for membranes not yet inserted into an arena
    /// (membrane-class templates, freshly cloned daughters).
    pub const UNASSIGNED: MembraneId = MembraneId(u32::MAX);
}

impl std::fmt::Display for MembraneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Global step counter (simulation time unit)
pub type Step = u64;
