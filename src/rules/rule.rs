//! Rules - guarded rewriting actions

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::rules::condition::Condition;
use crate::rules::result::RuleResult;

/// A named rewriting rule: conditions that must hold, results produced when
/// it fires.
///
/// Rules are evaluated in the order they were registered on a membrane; that
/// order is the sole tie-break for resource contention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub conditions: Vec<Condition>,
    pub results: Vec<RuleResult>,
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conditions: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_result(mut self, result: RuleResult) -> Self {
        self.results.push(result);
        self
    }

    /// Bound variables established by consuming conditions. Only these have
    /// a predictable value when results are applied.
    pub fn consuming_bindings(&self) -> HashSet<&str> {
        self.conditions
            .iter()
            .filter(|c| c.consuming)
            .filter_map(|c| c.quantity.as_bound())
            .collect()
    }

    /// First result variable lacking a consuming binding, if any.
    ///
    /// Such a rule has an unpredictable dimension and must not fire.
    pub fn unbound_result_variable(&self) -> Option<&str> {
        let bound = self.consuming_bindings();
        self.results
            .iter()
            .flat_map(|r| r.variables())
            .find(|var| !bound.contains(var))
    }

    /// True if any result restructures the membrane tree.
    pub fn is_structural(&self) -> bool {
        self.results.iter().any(|r| r.is_structural())
    }
}
