//! Resource commitment and product application - phases 2 and 3 of a step
//!
//! `fetch` is the prepare half of the two-phase commit: it validates every
//! tunnel a scheduled rule needs and irreversibly subtracts the rule's
//! inputs, rule by rule, dropping rules whose structural preconditions fail
//! without touching the rest. `set_products` then applies the surviving
//! rules' outputs, which may enqueue tunnel deliveries or restructure the
//! tree (division, dissolution).

use ahash::AHashMap;

use crate::core::error::{PsimError, Result};
use crate::core::types::MembraneId;
use crate::listener::SystemEvent;
use crate::membrane::{Schedule, ScheduledRule};
use crate::object::Object;
use crate::rules::{Destination, DivisionResult, ObjectResult, Quantity, Rule, RuleResult};
use crate::system::MembraneSystem;
use crate::tunnel::{Delivery, Tunnel, TunnelKind};

/// Resolve a result quantity against the bindings fixed at evaluation time.
fn resolve_quantity(quantity: &Quantity, bindings: &AHashMap<String, u64>) -> u64 {
    match quantity {
        Quantity::Literal(n) => *n,
        // Unpredictable dimensions were rejected in phase 1, so the binding
        // exists for every variable that reaches this point.
        Quantity::Bound(variable) => bindings.get(variable).copied().unwrap_or(0),
    }
}

/// Per-application consumption of a rule, aggregated per object.
fn consumption(rule: &Rule, bindings: &AHashMap<String, u64>) -> AHashMap<Object, u64> {
    let mut required: AHashMap<Object, u64> = AHashMap::new();
    for condition in &rule.conditions {
        if !condition.consuming {
            continue;
        }
        let need = resolve_quantity(&condition.quantity, bindings);
        if need > 0 {
            *required.entry(condition.object.clone()).or_insert(0) += need;
        }
    }
    required
}

impl MembraneSystem {
    /// Commit the schedule's inputs (phase 2).
    ///
    /// Returns the subset of entries that committed. A rule is dropped only
    /// when a tunnel it needs cannot be resolved; its consumption is then
    /// not subtracted, leaving the multiset exactly as if the rule had never
    /// been selected. Zero-count entries pass through untouched.
    pub fn fetch(&mut self, id: MembraneId, schedule: Schedule) -> Result<Schedule> {
        if self.get(id)?.is_deleted() {
            return Err(PsimError::MembraneDeleted(id));
        }

        let mut committed = Vec::with_capacity(schedule.entries.len());
        for entry in schedule.entries {
            if entry.count == 0 {
                committed.push(entry);
                continue;
            }
            let rule = self.get(id)?.rules()[entry.rule_index].clone();

            if let Some((kind, target)) = self.missing_tunnel(id, &rule) {
                tracing::warn!(
                    "membrane {}: rule '{}' dropped at fetch, no open {:?} tunnel to {:?}",
                    id,
                    rule.name,
                    kind,
                    target
                );
                continue;
            }

            if !self.subtract_consumption(id, &rule, &entry) {
                tracing::warn!(
                    "membrane {}: rule '{}' dropped at fetch, inputs no longer available",
                    id,
                    rule.name
                );
                continue;
            }
            committed.push(entry);
        }
        Ok(Schedule { entries: committed })
    }

    /// First tunnel requirement of the rule that does not resolve, if any.
    fn missing_tunnel(
        &self,
        id: MembraneId,
        rule: &Rule,
    ) -> Option<(TunnelKind, Option<String>)> {
        for condition in &rule.conditions {
            if let Some((kind, target)) = condition.required_tunnel() {
                if self.resolve_tunnel(id, kind, target).is_none() {
                    return Some((kind, target.map(str::to_string)));
                }
            }
        }
        for result in &rule.results {
            match result {
                RuleResult::Object(object_result) => {
                    if let Destination::Via { kind, target } = &object_result.destination {
                        if self.resolve_tunnel(id, *kind, target.as_deref()).is_none() {
                            return Some((*kind, target.clone()));
                        }
                    }
                }
                RuleResult::Division(division) => {
                    if self.resolve_tunnel(id, TunnelKind::Out, None).is_none() {
                        return Some((TunnelKind::Out, None));
                    }
                    // Daughters start with only an Out tunnel to the parent,
                    // so any other routed daughter result can never deliver.
                    for result in division.daughter1.iter().chain(&division.daughter2) {
                        if let Destination::Via { kind, target } = &result.destination {
                            if *kind != TunnelKind::Out {
                                return Some((*kind, target.clone()));
                            }
                        }
                    }
                }
                // Dissolution delivers the multiset to the parent.
                RuleResult::Dissolution => {
                    if self.resolve_tunnel(id, TunnelKind::Out, None).is_none() {
                        return Some((TunnelKind::Out, None));
                    }
                }
            }
        }
        None
    }

    /// Subtract one rule's total consumption, all-or-nothing.
    fn subtract_consumption(&mut self, id: MembraneId, rule: &Rule, entry: &ScheduledRule) -> bool {
        let required = consumption(rule, &entry.bindings);
        let Some(membrane) = self.membrane_mut(id) else {
            return false;
        };
        let short = required
            .iter()
            .any(|(object, need)| membrane.quantity_of(object) < need * entry.count);
        if short {
            return false;
        }

        let mut events = Vec::with_capacity(required.len());
        let mut names: Vec<&Object> = required.keys().collect();
        names.sort();
        for object in names {
            let total = required[object] * entry.count;
            membrane.reduce_object(object, total);
            events.push(SystemEvent::ObjectChanged {
                membrane: id,
                object: object.clone(),
                delta: -(total as i64),
                quantity: membrane.quantity_of(object),
            });
        }
        for event in events {
            self.notify(event);
        }
        true
    }

    /// Apply the committed schedule's outputs (phase 3).
    ///
    /// Returns the (rule, count) pairs that applied. Division clones the
    /// membrane twice and rewires the tree; dissolution merges the membrane
    /// into its parent. Results reaching a membrane deleted earlier in the
    /// same call are deferred and re-routed: to both daughters after a
    /// division, to the parent after a dissolution.
    pub fn set_products(&mut self, id: MembraneId, schedule: Schedule) -> Result<Vec<(String, u64)>> {
        self.get(id)?;

        let mut applied = Vec::new();
        let mut daughters: Option<(MembraneId, MembraneId)> = None;
        let mut dissolved_into: Option<MembraneId> = None;

        for entry in &schedule.entries {
            if entry.count == 0 {
                continue;
            }
            let rule = self.get(id)?.rules()[entry.rule_index].clone();
            for result in &rule.results {
                match result {
                    RuleResult::Object(object_result) => {
                        let per_application =
                            resolve_quantity(&object_result.quantity, &entry.bindings);
                        let quantity =
                            per_application.checked_mul(entry.count).unwrap_or_else(|| {
                                tracing::warn!(
                                    "membrane {}: rule '{}' result {} overflows at {}x{}, saturating",
                                    id,
                                    entry.rule_name,
                                    object_result.object,
                                    per_application,
                                    entry.count
                                );
                                u64::MAX
                            });
                        if quantity > 0 {
                            self.apply_object_result(id, object_result, quantity)?;
                        }
                    }
                    RuleResult::Dissolution => {
                        // A second dissolution in the same call is a no-op.
                        if !self.get(id)?.is_deleted() {
                            dissolved_into = Some(self.dissolve(id)?);
                        }
                    }
                    RuleResult::Division(division) => {
                        let pair = self.divide(id, division, &entry.bindings)?;
                        daughters = Some(pair);
                    }
                }
            }
            tracing::debug!(
                "membrane {}: rule '{}' applied {} time(s)",
                id,
                entry.rule_name,
                entry.count
            );
            applied.push((entry.rule_name.clone(), entry.count));
            self.notify(SystemEvent::RuleFired {
                membrane: id,
                rule: entry.rule_name.clone(),
                count: entry.count,
            });
        }

        // Route results deferred past the in-call restructuring.
        let deferred = match self.membrane_mut(id) {
            Some(membrane) => membrane.take_deferred(),
            None => Vec::new(),
        };
        if !deferred.is_empty() {
            if let Some((first, second)) = daughters {
                for delivery in &deferred {
                    self.deliver(first, delivery);
                    self.deliver(second, delivery);
                }
            } else if let Some(parent) = dissolved_into {
                for delivery in &deferred {
                    self.deliver(parent, delivery);
                }
            }
        }
        Ok(applied)
    }

    /// Apply one object result: locally, through a tunnel, or onto the
    /// deferred list when the membrane was deleted earlier in this call.
    fn apply_object_result(
        &mut self,
        id: MembraneId,
        result: &ObjectResult,
        quantity: u64,
    ) -> Result<()> {
        let delivery = Delivery {
            object: result.object.clone(),
            quantity,
        };
        if self.get(id)?.is_deleted() {
            self.get_mut(id)?.push_deferred(delivery);
            return Ok(());
        }
        match &result.destination {
            Destination::Local => {
                self.deliver(id, &delivery);
                Ok(())
            }
            Destination::Via { kind, target } => {
                let index = self
                    .resolve_tunnel(id, *kind, target.as_deref())
                    .ok_or_else(|| PsimError::TunnelNotFound {
                        membrane: self.membranes[&id].name.clone(),
                        kind: *kind,
                        target: target.clone(),
                    })?;
                self.get_mut(id)?.tunnels_mut()[index].enqueue(delivery);
                Ok(())
            }
        }
    }

    /// Dissolve a membrane: transfer its remaining multiset to the parent
    /// through the Out tunnel, mark it deleted, close every tunnel touching
    /// it. Returns the parent id.
    fn dissolve(&mut self, id: MembraneId) -> Result<MembraneId> {
        let parent = self
            .parent_of(id)
            .ok_or_else(|| PsimError::TunnelNotFound {
                membrane: self.membranes[&id].name.clone(),
                kind: TunnelKind::Out,
                target: None,
            })?;

        let membrane = self.get_mut(id)?;
        let out_index = membrane
            .tunnel_index(TunnelKind::Out)
            .expect("parent_of resolved through this tunnel");
        for (object, quantity) in membrane.sorted_objects() {
            membrane.reduce_object(&object, quantity);
            membrane.tunnels_mut()[out_index].enqueue(Delivery { object, quantity });
        }
        membrane.mark_deleted();

        // Closing drains, which delivers the transfer to the parent.
        self.close_all_tunnels_touching(id);
        self.notify(SystemEvent::MembraneDissolved {
            membrane: id,
            parent,
        });
        Ok(parent)
    }

    /// Divide a membrane into two daughters (all-or-nothing).
    ///
    /// Each daughter is a structural clone of the original (minus transient
    /// state) plus its own result set; the parent's In tunnel is retargeted
    /// to both daughters, each daughter gets a fresh Out tunnel, and the
    /// original is deleted.
    fn divide(
        &mut self,
        id: MembraneId,
        division: &DivisionResult,
        bindings: &AHashMap<String, u64>,
    ) -> Result<(MembraneId, MembraneId)> {
        let membrane = self.get(id)?;
        if membrane.is_deleted() {
            return Err(PsimError::CloneFailure {
                membrane: membrane.name.clone(),
                reason: "membrane was already deleted this step".to_string(),
            });
        }
        let parent = self
            .parent_of(id)
            .ok_or_else(|| PsimError::TunnelNotFound {
                membrane: membrane.name.clone(),
                kind: TunnelKind::Out,
                target: None,
            })?;

        let first = membrane.clone_structure();
        let second = membrane.clone_structure();

        let first_id = self.insert(first);
        let second_id = self.insert(second);

        // The parent's In tunnel now feeds both daughters. Other targets on
        // the same tunnel (siblings from an earlier division) are kept.
        if let Some(parent_membrane) = self.membrane_mut(parent) {
            for tunnel in parent_membrane.tunnels_mut() {
                if tunnel.kind == TunnelKind::In && tunnel.is_open() && tunnel.has_target(id) {
                    tunnel.replace_target(id, &[first_id, second_id]);
                }
            }
        }
        self.get_mut(first_id)?
            .add_tunnel(Tunnel::new(TunnelKind::Out, first_id, parent));
        self.get_mut(second_id)?
            .add_tunnel(Tunnel::new(TunnelKind::Out, second_id, parent));

        // Daughter results follow their destinations, now that each daughter
        // has its Out tunnel. Fetch already rejected anything unroutable;
        // anything still unresolvable here is dropped, not fatal.
        for (daughter, results) in [
            (first_id, &division.daughter1),
            (second_id, &division.daughter2),
        ] {
            for result in results {
                let quantity = resolve_quantity(&result.quantity, bindings);
                if quantity == 0 {
                    continue;
                }
                if let Err(err) = self.apply_object_result(daughter, result, quantity) {
                    tracing::warn!(
                        "daughter {}: result {}x{} dropped: {}",
                        daughter,
                        result.object,
                        quantity,
                        err
                    );
                }
            }
        }

        // The parent's tunnel no longer targets the original, so this only
        // closes the original's own side.
        self.close_all_tunnels_touching(id);
        self.get_mut(id)?.mark_deleted();

        self.notify(SystemEvent::MembraneDivided {
            original: id,
            daughters: (first_id, second_id),
        });
        self.notify(SystemEvent::MembraneDeleted { membrane: id });
        Ok((first_id, second_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membrane::Membrane;
    use crate::rules::Condition;

    fn system_with_child(objects: &[(&str, u64)]) -> (MembraneSystem, MembraneId, MembraneId) {
        let mut system = MembraneSystem::new();
        let env = system.new_membrane("Environment");
        let mut inner = Membrane::new("a");
        for (name, quantity) in objects {
            inner.add_object(*name, *quantity);
        }
        let a = system.insert(inner);
        system.add_child(env, a).unwrap();
        (system, env, a)
    }

    fn q(system: &MembraneSystem, id: MembraneId, name: &str) -> u64 {
        system.membrane(id).unwrap().quantity_of(&Object::new(name))
    }

    #[test]
    fn test_fetch_subtracts_committed_inputs() {
        let (mut system, _env, a) = system_with_child(&[("d", 7)]);
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("r1")
                .with_condition(Condition::consuming("d", 2))
                .with_result(RuleResult::Object(ObjectResult::local("e", 1))),
        );
        let schedule = system.membrane(a).unwrap().get_usable_rules().unwrap();
        let committed = system.fetch(a, schedule).unwrap();
        assert_eq!(committed.count_of("r1"), Some(3));
        assert_eq!(q(&system, a, "d"), 1);
    }

    #[test]
    fn test_fetch_drops_rule_missing_tunnel_untouched() {
        let mut system = MembraneSystem::new();
        // No parent: the Out destination cannot resolve.
        let mut membrane = Membrane::new("orphan");
        membrane.add_object("d", 4);
        let id = system.insert(membrane);
        system.membrane_mut(id).unwrap().add_rule(
            Rule::new("send").with_condition(Condition::consuming("d", 1)).with_result(
                RuleResult::Object(ObjectResult::via("d", 1, TunnelKind::Out, None)),
            ),
        );
        system.membrane_mut(id).unwrap().add_rule(
            Rule::new("keep")
                .with_condition(Condition::consuming("d", 1))
                .with_result(RuleResult::Object(ObjectResult::local("e", 1))),
        );
        let schedule = system.membrane(id).unwrap().get_usable_rules().unwrap();
        assert_eq!(schedule.count_of("send"), Some(4));
        let committed = system.fetch(id, schedule).unwrap();
        // "send" dropped entirely, "keep" kept what resolution left it.
        assert!(committed.count_of("send").is_none());
        assert_eq!(committed.count_of("keep"), Some(0));
        assert_eq!(q(&system, id, "d"), 4);
    }

    #[test]
    fn test_set_products_local_and_tunnel() {
        let (mut system, env, a) = system_with_child(&[("d", 3)]);
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("r1")
                .with_condition(Condition::consuming("d", 1))
                .with_result(RuleResult::Object(ObjectResult::local("e", 2)))
                .with_result(RuleResult::Object(ObjectResult::via(
                    "f",
                    1,
                    TunnelKind::Out,
                    None,
                ))),
        );
        let schedule = system.membrane(a).unwrap().get_usable_rules().unwrap();
        let committed = system.fetch(a, schedule).unwrap();
        let applied = system.set_products(a, committed).unwrap();
        assert_eq!(applied, vec![("r1".to_string(), 3)]);
        assert_eq!(q(&system, a, "e"), 6);
        // Tunnel results wait for the drain.
        assert_eq!(q(&system, env, "f"), 0);
        system.drain_all_tunnels();
        assert_eq!(q(&system, env, "f"), 3);
    }

    #[test]
    fn test_result_variable_reuses_binding() {
        let (mut system, env, a) = system_with_child(&[("d", 5)]);
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("pump")
                .with_condition(Condition::consuming("d", Quantity::Bound("n".to_string())))
                .with_result(RuleResult::Object(ObjectResult::via(
                    "d",
                    Quantity::Bound("n".to_string()),
                    TunnelKind::Out,
                    None,
                ))),
        );
        let schedule = system.membrane(a).unwrap().get_usable_rules().unwrap();
        let committed = system.fetch(a, schedule).unwrap();
        system.set_products(a, committed).unwrap();
        system.drain_all_tunnels();
        assert_eq!(q(&system, a, "d"), 0);
        assert_eq!(q(&system, env, "d"), 5);
    }

    #[test]
    fn test_dissolution_merges_into_parent() {
        let (mut system, env, a) = system_with_child(&[("d", 3), ("e", 1)]);
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("burst")
                .with_condition(Condition::consuming("e", 1))
                .with_result(RuleResult::Dissolution),
        );
        let schedule = system.membrane(a).unwrap().get_usable_rules().unwrap();
        let committed = system.fetch(a, schedule).unwrap();
        system.set_products(a, committed).unwrap();

        assert!(system.membrane(a).unwrap().is_deleted());
        assert!(system.membrane(a).unwrap().tunnels().is_empty());
        assert!(system.children_of(env).is_empty());
        // Remaining contents moved up.
        assert_eq!(q(&system, env, "d"), 3);
        assert_eq!(q(&system, env, "e"), 0);
    }

    #[test]
    fn test_division_replaces_membrane_with_daughters() {
        let (mut system, env, a) = system_with_child(&[("d", 3)]);
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("r1")
                .with_condition(Condition::consuming("d", 1))
                .with_result(RuleResult::Division(DivisionResult {
                    daughter1: vec![ObjectResult::local("d", 1)],
                    daughter2: vec![ObjectResult::local("d", 1)],
                })),
        );
        let schedule = system.membrane(a).unwrap().get_usable_rules().unwrap();
        let committed = system.fetch(a, schedule).unwrap();
        system.set_products(a, committed).unwrap();

        assert!(system.membrane(a).unwrap().is_deleted());
        let children = system.children_of(env);
        assert_eq!(children.len(), 2);
        assert!(!children.contains(&a));
        for child in &children {
            assert_eq!(system.parent_of(*child), Some(env));
            // Clone of the post-fetch multiset (2) plus the daughter result (1).
            assert_eq!(q(&system, *child, "d"), 3);
        }
    }

    #[test]
    fn test_daughter_results_follow_destinations() {
        let (mut system, env, a) = system_with_child(&[("d", 3)]);
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("split")
                .with_condition(Condition::consuming("d", 1))
                .with_result(RuleResult::Division(DivisionResult {
                    daughter1: vec![ObjectResult::via("x", 5, TunnelKind::Out, None)],
                    daughter2: vec![ObjectResult::local("y", 2)],
                })),
        );
        let schedule = system.membrane(a).unwrap().get_usable_rules().unwrap();
        let committed = system.fetch(a, schedule).unwrap();
        system.set_products(a, committed).unwrap();
        system.drain_all_tunnels();

        // The routed result went up, not into the daughter's multiset.
        assert_eq!(q(&system, env, "x"), 5);
        let children = system.children_of(env);
        assert_eq!(children.len(), 2);
        for child in &children {
            assert_eq!(q(&system, *child, "x"), 0);
        }
        let local_y: u64 = children.iter().map(|id| q(&system, *id, "y")).sum();
        assert_eq!(local_y, 2);
    }

    #[test]
    fn test_division_with_unroutable_daughter_result_dropped_at_fetch() {
        let (mut system, _env, a) = system_with_child(&[("d", 2)]);
        // Daughters only ever have an Out tunnel; a Go destination in a
        // daughter result can never deliver.
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("split")
                .with_condition(Condition::consuming("d", 1))
                .with_result(RuleResult::Division(DivisionResult {
                    daughter1: vec![ObjectResult::via(
                        "x",
                        1,
                        TunnelKind::Go,
                        Some("elsewhere".to_string()),
                    )],
                    daughter2: Vec::new(),
                })),
        );
        let schedule = system.membrane(a).unwrap().get_usable_rules().unwrap();
        let committed = system.fetch(a, schedule).unwrap();
        assert!(committed.count_of("split").is_none());
        assert_eq!(q(&system, a, "d"), 2);
        assert!(!system.membrane(a).unwrap().is_deleted());
    }

    #[test]
    fn test_large_result_quantity_saturates() {
        let (mut system, _env, a) = system_with_child(&[("d", 2)]);
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("flood")
                .with_condition(Condition::consuming("d", 1))
                .with_result(RuleResult::Object(ObjectResult::local("e", u64::MAX))),
        );
        let schedule = system.membrane(a).unwrap().get_usable_rules().unwrap();
        let committed = system.fetch(a, schedule).unwrap();
        assert_eq!(committed.count_of("flood"), Some(2));
        system.set_products(a, committed).unwrap();
        assert_eq!(q(&system, a, "e"), u64::MAX);
    }

    #[test]
    fn test_division_without_parent_dropped_at_fetch() {
        let mut system = MembraneSystem::new();
        let mut membrane = Membrane::new("orphan");
        membrane.add_object("d", 1);
        let id = system.insert(membrane);
        system.membrane_mut(id).unwrap().add_rule(
            Rule::new("r1")
                .with_condition(Condition::consuming("d", 1))
                .with_result(RuleResult::Division(DivisionResult::default())),
        );
        let schedule = system.membrane(id).unwrap().get_usable_rules().unwrap();
        let committed = system.fetch(id, schedule).unwrap();
        assert!(committed.count_of("r1").is_none());
        assert_eq!(q(&system, id, "d"), 1);
    }

    #[test]
    fn test_division_after_dissolution_is_clone_failure() {
        let (mut system, _env, a) = system_with_child(&[("d", 2)]);
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("burst")
                .with_condition(Condition::consuming("d", 1))
                .with_result(RuleResult::Dissolution),
        );
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("split")
                .with_condition(Condition::consuming("d", 1))
                .with_result(RuleResult::Division(DivisionResult::default())),
        );
        let schedule = system.membrane(a).unwrap().get_usable_rules().unwrap();
        let committed = system.fetch(a, schedule).unwrap();
        let err = system.set_products(a, committed).unwrap_err();
        assert!(matches!(err, PsimError::CloneFailure { .. }));
    }

    #[test]
    fn test_results_after_dissolution_deferred_to_parent() {
        let (mut system, env, a) = system_with_child(&[("d", 1), ("e", 1)]);
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("burst")
                .with_condition(Condition::consuming("d", 1))
                .with_result(RuleResult::Dissolution),
        );
        system.membrane_mut(a).unwrap().add_rule(
            Rule::new("late")
                .with_condition(Condition::consuming("e", 1))
                .with_result(RuleResult::Object(ObjectResult::local("x", 4))),
        );
        let schedule = system.membrane(a).unwrap().get_usable_rules().unwrap();
        let committed = system.fetch(a, schedule).unwrap();
        system.set_products(a, committed).unwrap();
        // "late" produced into a dissolved membrane; its output lands in the
        // parent instead of vanishing.
        assert_eq!(q(&system, env, "x"), 4);
    }
}
