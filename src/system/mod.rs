//! MembraneSystem - the arena owning every membrane in one simulation
//!
//! Membranes are addressed by stable [`MembraneId`]; tunnels hold target ids
//! rather than handles, so division and dissolution can restructure the tree
//! without aliasing problems. Tree queries (parent, children, neighbors) are
//! pure functions over the tunnel lists.

pub mod phases;
pub mod registry;

pub use registry::MembraneRegistry;

use ahash::AHashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::core::error::{PsimError, Result};
use crate::core::types::MembraneId;
use crate::listener::{SystemEvent, SystemListener};
use crate::membrane::Membrane;
use crate::tunnel::{Delivery, Tunnel, TunnelKind};

/// Arena of membranes plus the shared RNG and listener list.
pub struct MembraneSystem {
    membranes: AHashMap<MembraneId, Membrane>,
    next_id: u32,
    rng: ChaCha8Rng,
    listeners: Vec<Box<dyn SystemListener>>,
}

impl MembraneSystem {
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Identical seeds and inputs produce identical runs; the RNG's only
    /// consumer is Random-tunnel target selection.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            membranes: AHashMap::new(),
            next_id: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            listeners: Vec::new(),
        }
    }

    // === Arena ===

    /// Insert a membrane, assigning it a fresh id.
    pub fn insert(&mut self, mut membrane: Membrane) -> MembraneId {
        let id = MembraneId(self.next_id);
        self.next_id += 1;
        membrane.id = id;
        self.membranes.insert(id, membrane);
        self.notify(SystemEvent::MembraneCreated { membrane: id });
        id
    }

    /// Create and insert an empty membrane.
    pub fn new_membrane(&mut self, name: impl Into<String>) -> MembraneId {
        self.insert(Membrane::new(name))
    }

    pub fn membrane(&self, id: MembraneId) -> Option<&Membrane> {
        self.membranes.get(&id)
    }

    pub fn membrane_mut(&mut self, id: MembraneId) -> Option<&mut Membrane> {
        self.membranes.get_mut(&id)
    }

    pub(crate) fn get(&self, id: MembraneId) -> Result<&Membrane> {
        self.membranes
            .get(&id)
            .ok_or(PsimError::MembraneNotFound(id))
    }

    pub(crate) fn get_mut(&mut self, id: MembraneId) -> Result<&mut Membrane> {
        self.membranes
            .get_mut(&id)
            .ok_or(PsimError::MembraneNotFound(id))
    }

    /// Non-deleted membranes in ascending id order (the driver's walk order).
    pub fn live_ids(&self) -> Vec<MembraneId> {
        let mut ids: Vec<MembraneId> = self
            .membranes
            .iter()
            .filter(|(_, m)| !m.is_deleted())
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Membrane whose name matches, among live membranes, lowest id first.
    pub fn find_by_name(&self, name: &str) -> Option<MembraneId> {
        self.live_ids()
            .into_iter()
            .find(|id| self.membranes[id].name == name)
    }

    // === Listeners ===

    pub fn add_listener(&mut self, listener: Box<dyn SystemListener>) {
        self.listeners.push(listener);
    }

    pub(crate) fn notify(&mut self, event: SystemEvent) {
        for listener in &mut self.listeners {
            listener.on_event(&event);
        }
    }

    // === Derived tree views ===

    /// Target of the first open Out tunnel.
    pub fn parent_of(&self, id: MembraneId) -> Option<MembraneId> {
        let membrane = self.membranes.get(&id)?;
        membrane
            .tunnel(TunnelKind::Out)
            .and_then(|t| t.targets().first().copied())
    }

    /// Targets of open In tunnels, deduplicated, tunnel-list order.
    pub fn children_of(&self, id: MembraneId) -> Vec<MembraneId> {
        self.targets_via(id, TunnelKind::In)
    }

    /// Targets of open Go tunnels, deduplicated, tunnel-list order.
    pub fn neighbors_of(&self, id: MembraneId) -> Vec<MembraneId> {
        self.targets_via(id, TunnelKind::Go)
    }

    fn targets_via(&self, id: MembraneId, kind: TunnelKind) -> Vec<MembraneId> {
        let Some(membrane) = self.membranes.get(&id) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for tunnel in membrane.tunnels() {
            if tunnel.kind != kind || !tunnel.is_open() {
                continue;
            }
            for target in tunnel.targets() {
                if !found.contains(target) {
                    found.push(*target);
                }
            }
        }
        found
    }

    // === Tree wiring ===

    /// Wire a mirrored In/Out tunnel pair between parent and child.
    pub fn add_child(&mut self, parent: MembraneId, child: MembraneId) -> Result<()> {
        self.get(parent)?;
        self.get(child)?;
        self.get_mut(parent)?
            .add_tunnel(Tunnel::new(TunnelKind::In, parent, child));
        self.get_mut(child)?
            .add_tunnel(Tunnel::new(TunnelKind::Out, child, parent));
        Ok(())
    }

    /// Wire a Go tunnel from `from` to `to`. One direction only; call twice
    /// for a symmetric neighborhood.
    pub fn add_neighbor(&mut self, from: MembraneId, to: MembraneId) -> Result<()> {
        self.get(to)?;
        self.get_mut(from)?
            .add_tunnel(Tunnel::new(TunnelKind::Go, from, to));
        Ok(())
    }

    /// Drain, shut and detach the owner's open tunnels of `kind`, all of
    /// them or only those targeting `target`. One-sided: the mirrored
    /// tunnel on the other membrane (if any) stays open.
    pub fn remove_tunnel(
        &mut self,
        owner: MembraneId,
        kind: TunnelKind,
        target: Option<MembraneId>,
    ) -> Result<()> {
        self.get(owner)?;
        self.close_tunnels_matching(owner, |t| {
            t.kind == kind && target.is_none_or(|id| t.has_target(id))
        });
        Ok(())
    }

    /// Close both sides of the parent/child relation, draining first.
    pub fn remove_child(&mut self, parent: MembraneId, child: MembraneId) -> Result<()> {
        self.get(parent)?;
        self.get(child)?;
        self.close_tunnels_matching(parent, |t| t.has_target(child));
        self.close_tunnels_matching(child, |t| {
            t.kind == TunnelKind::Out && t.has_target(parent)
        });
        Ok(())
    }

    /// Delete a membrane: close every tunnel touching it (draining pending
    /// results first), then flip its deleted flag.
    pub fn delete(&mut self, id: MembraneId) -> Result<()> {
        self.get(id)?;
        self.close_all_tunnels_touching(id);
        self.get_mut(id)?.mark_deleted();
        self.notify(SystemEvent::MembraneDeleted { membrane: id });
        Ok(())
    }

    // === Tunnel resolution and delivery ===

    /// Index of an open tunnel of `kind` on `id` that can deliver: its
    /// target name matches if one is required, and at least one target is
    /// live (Here tunnels target the owner itself).
    pub(crate) fn resolve_tunnel(
        &self,
        id: MembraneId,
        kind: TunnelKind,
        target_name: Option<&str>,
    ) -> Option<usize> {
        let membrane = self.membranes.get(&id)?;
        membrane.tunnels().iter().position(|tunnel| {
            if tunnel.kind != kind || !tunnel.is_open() {
                return false;
            }
            tunnel.targets().iter().any(|target| {
                let Some(m) = self.membranes.get(target) else {
                    return false;
                };
                if m.is_deleted() {
                    return false;
                }
                match target_name {
                    Some(name) => m.name == name,
                    None => true,
                }
            })
        })
    }

    /// Drain one tunnel's pending queue, applying each delivery per the
    /// tunnel kind: every live target for All, one randomly chosen live
    /// target for Random, the first live target otherwise.
    pub fn drain_tunnel(&mut self, owner: MembraneId, index: usize) {
        let (kind, targets, queue) = {
            let Some(membrane) = self.membranes.get_mut(&owner) else {
                return;
            };
            let Some(tunnel) = membrane.tunnels_mut().get_mut(index) else {
                return;
            };
            (tunnel.kind, tunnel.targets().to_vec(), tunnel.take_queue())
        };
        if queue.is_empty() {
            return;
        }

        let live: Vec<MembraneId> = targets
            .iter()
            .copied()
            .filter(|t| self.membranes.get(t).is_some_and(|m| !m.is_deleted()))
            .collect();
        if live.is_empty() {
            tracing::warn!(
                "{} deliveries on {:?} tunnel from {} dropped: no live target",
                queue.len(),
                kind,
                owner
            );
            return;
        }

        for delivery in queue {
            let recipients: Vec<MembraneId> = if kind.is_broadcast() {
                live.clone()
            } else if kind == TunnelKind::Random {
                vec![live[self.rng.gen_range(0..live.len())]]
            } else {
                vec![live[0]]
            };
            for recipient in recipients {
                self.deliver(recipient, &delivery);
            }
        }
    }

    /// Drain every tunnel in the system, owners in ascending id order.
    pub fn drain_all_tunnels(&mut self) {
        let mut owners: Vec<MembraneId> = self.membranes.keys().copied().collect();
        owners.sort();
        for owner in owners {
            let count = self
                .membranes
                .get(&owner)
                .map(|m| m.tunnels().len())
                .unwrap_or(0);
            for index in 0..count {
                self.drain_tunnel(owner, index);
            }
        }
    }

    pub(crate) fn deliver(&mut self, recipient: MembraneId, delivery: &Delivery) {
        let Some(membrane) = self.membranes.get_mut(&recipient) else {
            return;
        };
        if membrane.is_deleted() {
            tracing::warn!(
                "delivery of {}x{} to deleted membrane {} dropped",
                delivery.object,
                delivery.quantity,
                recipient
            );
            return;
        }
        membrane.add_object(delivery.object.clone(), delivery.quantity);
        let quantity = membrane.quantity_of(&delivery.object);
        self.notify(SystemEvent::ObjectChanged {
            membrane: recipient,
            object: delivery.object.clone(),
            delta: delivery.quantity as i64,
            quantity,
        });
    }

    /// Drain, shut and detach the owner's tunnels matching a predicate.
    fn close_tunnels_matching<F: Fn(&Tunnel) -> bool>(&mut self, owner: MembraneId, matches: F) {
        let indices: Vec<usize> = {
            let Some(membrane) = self.membranes.get(&owner) else {
                return;
            };
            membrane
                .tunnels()
                .iter()
                .enumerate()
                .filter(|(_, t)| t.is_open() && matches(t))
                .map(|(i, _)| i)
                .collect()
        };
        for index in &indices {
            self.drain_tunnel(owner, *index);
        }
        if let Some(membrane) = self.membranes.get_mut(&owner) {
            for index in indices {
                if let Some(tunnel) = membrane.tunnels_mut().get_mut(index) {
                    tunnel.shut();
                }
            }
            membrane.prune_closed_tunnels();
        }
    }

    /// Close the membrane's own tunnels and every other membrane's tunnels
    /// targeting it. Used by deletion, dissolution and division.
    pub(crate) fn close_all_tunnels_touching(&mut self, id: MembraneId) {
        self.close_tunnels_matching(id, |_| true);
        let owners: Vec<MembraneId> = {
            let mut owners: Vec<MembraneId> = self
                .membranes
                .iter()
                .filter(|(owner, m)| {
                    **owner != id && m.tunnels().iter().any(|t| t.is_open() && t.has_target(id))
                })
                .map(|(owner, _)| *owner)
                .collect();
            owners.sort();
            owners
        };
        for owner in owners {
            self.close_tunnels_matching(owner, |t| t.has_target(id));
        }
    }
}

impl Default for MembraneSystem {
    fn default() -> Self {
        Self::new()
    }
}
