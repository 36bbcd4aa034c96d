//! Tunnels - typed, directed communication edges between membranes
//!
//! A tunnel is owned by its source membrane and holds non-owning target ids
//! into the arena. In/Out tunnels come in mirrored pairs wired by
//! [`crate::system::MembraneSystem::add_child`]; closing one side never
//! closes the other, so structural operations (deletion, dissolution,
//! division) close every tunnel touching the affected membrane explicitly.

use serde::{Deserialize, Serialize};

use crate::core::types::MembraneId;
use crate::object::Object;

/// Relation a tunnel expresses, fixed at design time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TunnelKind {
    /// Parent -> child.
    In,
    /// Child -> parent.
    Out,
    /// Neighbor edge.
    Go,
    /// Loopback onto the owning membrane.
    Here,
    /// Delivers each queued result to one randomly chosen target.
    Random,
    /// Broadcast to every target.
    All,
}

impl TunnelKind {
    /// Kinds that deliver to every target rather than a single one.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, TunnelKind::All)
    }
}

/// A quantity of one object awaiting delivery through a tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub object: Object,
    pub quantity: u64,
}

/// Directed edge from an owning source membrane to its targets, carrying a
/// pending-result queue.
#[derive(Debug, Clone)]
pub struct Tunnel {
    pub kind: TunnelKind,
    pub source: MembraneId,
    targets: Vec<MembraneId>,
    open: bool,
    queue: Vec<Delivery>,
}

impl Tunnel {
    pub fn new(kind: TunnelKind, source: MembraneId, target: MembraneId) -> Self {
        Self {
            kind,
            source,
            targets: vec![target],
            open: true,
            queue: Vec::new(),
        }
    }

    /// Tunnel with several targets (broadcast kinds, or a parent's In tunnel
    /// after a division retargeted it to both daughters).
    pub fn with_targets(kind: TunnelKind, source: MembraneId, targets: Vec<MembraneId>) -> Self {
        Self {
            kind,
            source,
            targets,
            open: true,
            queue: Vec::new(),
        }
    }

    pub fn targets(&self) -> &[MembraneId] {
        &self.targets
    }

    pub fn has_target(&self, id: MembraneId) -> bool {
        self.targets.contains(&id)
    }

    pub fn add_target(&mut self, id: MembraneId) {
        if !self.targets.contains(&id) {
            self.targets.push(id);
        }
    }

    /// Replace the target list wholesale (division rewiring).
    pub fn retarget(&mut self, targets: Vec<MembraneId>) {
        self.targets = targets;
    }

    /// Splice replacements in at `old`'s position, keeping other targets.
    /// No-op if `old` is not a target.
    pub fn replace_target(&mut self, old: MembraneId, replacements: &[MembraneId]) {
        let Some(position) = self.targets.iter().position(|t| *t == old) else {
            return;
        };
        self.targets.remove(position);
        let mut offset = 0;
        for replacement in replacements {
            if !self.targets.contains(replacement) {
                self.targets.insert(position + offset, *replacement);
                offset += 1;
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Queue a delivery for the next drain. Dropped with a warning if the
    /// tunnel was already closed.
    pub fn enqueue(&mut self, delivery: Delivery) {
        if !self.open {
            tracing::warn!(
                "dropping delivery of {}x{} on closed {:?} tunnel from {}",
                delivery.object,
                delivery.quantity,
                self.kind,
                self.source
            );
            return;
        }
        self.queue.push(delivery);
    }

    /// Take the pending queue for delivery, leaving it empty.
    pub fn take_queue(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.queue)
    }

    pub fn pending(&self) -> &[Delivery] {
        &self.queue
    }

    /// Mark the tunnel unusable. Draining and detaching from the owner's
    /// tunnel list happen at the system level, which sees both sides.
    pub fn shut(&mut self) {
        self.open = false;
    }
}
