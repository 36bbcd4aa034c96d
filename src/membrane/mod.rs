//! Membranes - compartments holding objects, rules and tunnels
//!
//! The membrane owns its multiset, its registration-ordered rule list and
//! its outgoing tunnels. Tree shape (parent/children/neighbors) is never
//! stored; it is derived from the tunnel list by the arena in
//! [`crate::system`], so it cannot desync from tunnel state.

pub mod dump;
pub mod schedule;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::core::error::{PsimError, Result};
use crate::core::types::MembraneId;
use crate::object::Object;
use crate::rules::{Quantity, Rule};
use crate::tunnel::{Delivery, Tunnel, TunnelKind};

pub use schedule::{Schedule, ScheduledRule};

/// Value of a membrane property.
///
/// Property names starting with `$` are transient per-step state and are
/// cleared by [`Membrane::new_step_init`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

/// A compartment in the P system tree.
#[derive(Debug, Clone)]
pub struct Membrane {
    /// Arena id; [`MembraneId::UNASSIGNED`] until inserted into a system.
    pub id: MembraneId,
    pub name: String,
    objects: AHashMap<Object, u64>,
    rules: Vec<Rule>,
    tunnels: Vec<Tunnel>,
    /// Results that arrived after this membrane was deleted mid-step; routed
    /// to the daughters after a division, to the parent after a dissolution.
    deferred: Vec<Delivery>,
    properties: AHashMap<String, PropertyValue>,
    deleted: bool,
}

impl Membrane {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: MembraneId::UNASSIGNED,
            name: name.into(),
            objects: AHashMap::new(),
            rules: Vec::new(),
            tunnels: Vec::new(),
            deferred: Vec::new(),
            properties: AHashMap::new(),
            deleted: false,
        }
    }

    // === Objects ===

    pub fn quantity_of(&self, object: &Object) -> u64 {
        self.objects.get(object).copied().unwrap_or(0)
    }

    /// Add `quantity` units of `object`. Refused on a deleted membrane.
    pub fn add_object(&mut self, object: impl Into<Object>, quantity: u64) {
        if self.deleted {
            tracing::warn!("add_object on deleted membrane '{}' ignored", self.name);
            return;
        }
        if quantity == 0 {
            return;
        }
        *self.objects.entry(object.into()).or_insert(0) += quantity;
    }

    /// Subtract `quantity` units of `object` if available.
    ///
    /// Returns false (and subtracts nothing) on shortfall.
    pub fn reduce_object(&mut self, object: &Object, quantity: u64) -> bool {
        match self.objects.get_mut(object) {
            Some(have) if *have >= quantity => {
                *have -= quantity;
                if *have == 0 {
                    self.objects.remove(object);
                }
                true
            }
            _ => false,
        }
    }

    pub fn objects(&self) -> &AHashMap<Object, u64> {
        &self.objects
    }

    /// Objects in name order, for any rendering or transfer where iteration
    /// order is observable.
    pub fn sorted_objects(&self) -> Vec<(Object, u64)> {
        let mut entries: Vec<(Object, u64)> =
            self.objects.iter().map(|(o, q)| (o.clone(), *q)).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    // === Rules ===

    /// Register a rule. Registration order is the contention tie-break.
    pub fn add_rule(&mut self, rule: Rule) {
        if self.deleted {
            tracing::warn!("add_rule on deleted membrane '{}' ignored", self.name);
            return;
        }
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    // === Tunnels ===

    pub fn add_tunnel(&mut self, tunnel: Tunnel) {
        if self.deleted {
            tracing::warn!("add_tunnel on deleted membrane '{}' ignored", self.name);
            return;
        }
        self.tunnels.push(tunnel);
    }

    pub fn tunnels(&self) -> &[Tunnel] {
        &self.tunnels
    }

    pub(crate) fn tunnels_mut(&mut self) -> &mut Vec<Tunnel> {
        &mut self.tunnels
    }

    /// First open tunnel of the given kind.
    pub fn tunnel(&self, kind: TunnelKind) -> Option<&Tunnel> {
        self.tunnels
            .iter()
            .find(|t| t.kind == kind && t.is_open())
    }

    /// First open tunnel of the given kind targeting `target`.
    pub fn tunnel_to(&self, kind: TunnelKind, target: MembraneId) -> Option<&Tunnel> {
        self.tunnels
            .iter()
            .find(|t| t.kind == kind && t.is_open() && t.has_target(target))
    }

    pub(crate) fn tunnel_index(&self, kind: TunnelKind) -> Option<usize> {
        self.tunnels
            .iter()
            .position(|t| t.kind == kind && t.is_open())
    }

    /// Drop closed tunnels from the owned list.
    pub(crate) fn prune_closed_tunnels(&mut self) {
        self.tunnels.retain(|t| t.is_open());
    }

    // === Properties ===

    pub fn set_property(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.insert(name.into(), value);
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> &AHashMap<String, PropertyValue> {
        &self.properties
    }

    // === Lifecycle ===

    /// Clear transient per-step state (`$`-prefixed properties).
    pub fn new_step_init(&mut self) {
        self.properties.retain(|name, _| !name.starts_with('$'));
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    pub(crate) fn push_deferred(&mut self, delivery: Delivery) {
        self.deferred.push(delivery);
    }

    pub(crate) fn take_deferred(&mut self) -> Vec<Delivery> {
        std::mem::take(&mut self.deferred)
    }

    /// Merge a template into this membrane: template objects are added,
    /// template rules appended, template properties fill absent keys only.
    pub fn extend(&mut self, template: &Membrane) {
        for (object, quantity) in template.sorted_objects() {
            self.add_object(object, quantity);
        }
        for rule in &template.rules {
            self.rules.push(rule.clone());
        }
        for (name, value) in &template.properties {
            self.properties
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Total structural copy of everything this membrane owns, except its
    /// identity, its tunnels and its transient `$`-properties.
    ///
    /// The single clone primitive shared by registry instantiation and
    /// division; callers assign the id and wire tunnels.
    pub fn clone_structure(&self) -> Membrane {
        Membrane {
            id: MembraneId::UNASSIGNED,
            name: self.name.clone(),
            objects: self.objects.clone(),
            rules: self.rules.clone(),
            tunnels: Vec::new(),
            deferred: Vec::new(),
            properties: self
                .properties
                .iter()
                .filter(|(name, _)| !name.starts_with('$'))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            deleted: false,
        }
    }

    // === Usable-rule resolution (phase 1) ===

    /// Compute the maximal (rule, count) schedule for the current multiset.
    ///
    /// Rules are evaluated in registration order; each rule resolves its
    /// bound variables against the quantities not yet reserved by earlier
    /// rules, then reserves its own consumption. Zero counts are included:
    /// a rule being present but unfireable is not an error. The call fails
    /// only on an unpredictable dimension (a result variable no consuming
    /// condition establishes); every offending rule is logged, the first is
    /// returned.
    pub fn get_usable_rules(&self) -> Result<Schedule> {
        let mut remaining = self.objects.clone();
        let mut entries = Vec::with_capacity(self.rules.len());
        let mut unpredictable: Option<(String, String)> = None;

        for (rule_index, rule) in self.rules.iter().enumerate() {
            if let Some(variable) = rule.unbound_result_variable() {
                tracing::warn!(
                    "membrane '{}': rule '{}' result variable '{}' has no consuming binding",
                    self.name,
                    rule.name,
                    variable
                );
                if unpredictable.is_none() {
                    unpredictable = Some((rule.name.clone(), variable.to_string()));
                }
                continue;
            }

            let (count, bindings) = resolve_rule(rule, &mut remaining);
            tracing::debug!(
                "membrane '{}': rule '{}' usable {} time(s)",
                self.name,
                rule.name,
                count
            );
            entries.push(ScheduledRule {
                rule_index,
                rule_name: rule.name.clone(),
                count,
                bindings,
            });
        }

        if let Some((rule, variable)) = unpredictable {
            return Err(PsimError::UnpredictableDimension {
                membrane: self.name.clone(),
                rule,
                variable,
            });
        }
        Ok(Schedule { entries })
    }
}

/// Resolve one rule against the not-yet-reserved quantities: bind variables,
/// compute the maximum simultaneous count, and reserve the consumption.
fn resolve_rule(
    rule: &Rule,
    remaining: &mut AHashMap<Object, u64>,
) -> (u64, AHashMap<String, u64>) {
    // Variables bind at their first consuming occurrence, to the full
    // remaining quantity of the matched object.
    let mut bindings: AHashMap<String, u64> = AHashMap::new();
    for condition in &rule.conditions {
        if !condition.consuming {
            continue;
        }
        if let Quantity::Bound(variable) = &condition.quantity {
            bindings
                .entry(variable.clone())
                .or_insert_with(|| remaining.get(&condition.object).copied().unwrap_or(0));
        }
    }

    // Aggregate the per-application requirement per object so several
    // conditions on the same object constrain the count jointly.
    let mut required: AHashMap<Object, u64> = AHashMap::new();
    let mut fireable = true;
    for condition in &rule.conditions {
        let need = match &condition.quantity {
            Quantity::Literal(n) => *n,
            Quantity::Bound(variable) => match bindings.get(variable) {
                Some(value) => *value,
                // Promoter-only variable: "all present", trivially satisfied.
                None => remaining.get(&condition.object).copied().unwrap_or(0),
            },
        };
        if condition.consuming {
            if condition.quantity.as_bound().is_some() && need == 0 {
                // "All present" of an absent object: nothing to consume.
                fireable = false;
            }
            if need > 0 {
                *required.entry(condition.object.clone()).or_insert(0) += need;
            }
        } else {
            let have = remaining.get(&condition.object).copied().unwrap_or(0);
            if have < need {
                fireable = false;
            }
        }
    }

    let mut count = if fireable {
        if required.is_empty() {
            // Promoter-only rule: fires once per step.
            1
        } else {
            required
                .iter()
                .map(|(object, need)| remaining.get(object).copied().unwrap_or(0) / need)
                .min()
                .unwrap_or(0)
        }
    } else {
        0
    };

    // Division and dissolution replace the membrane; applying them more
    // than once per step is meaningless.
    if rule.is_structural() {
        count = count.min(1);
    }

    if count > 0 {
        for (object, need) in &required {
            if let Some(have) = remaining.get_mut(object) {
                *have = have.saturating_sub(need * count);
            }
        }
    }

    (count, bindings)
}
