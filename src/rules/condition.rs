//! Rule conditions - what must be present for a rule to fire

use serde::{Deserialize, Serialize};

use crate::object::Object;
use crate::tunnel::TunnelKind;

/// A quantity in a rule: a fixed count, or a rule-local variable resolved at
/// evaluation time to "all remaining units of the matched object".
///
/// The same variable name may appear in several conditions and results of
/// one rule; it resolves to a single value per evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Literal(u64),
    Bound(String),
}

impl Quantity {
    pub fn as_bound(&self) -> Option<&str> {
        match self {
            Quantity::Bound(var) => Some(var),
            Quantity::Literal(_) => None,
        }
    }
}

impl From<u64> for Quantity {
    fn from(n: u64) -> Self {
        Quantity::Literal(n)
    }
}

/// Where a condition's objects are looked for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourceRef {
    /// The membrane evaluating the rule.
    #[default]
    Local,
    /// A named neighbor reached through a Go tunnel.
    Neighbor(String),
    /// Any open tunnel of the given kind.
    AnyVia(TunnelKind),
}

/// One requirement of a rule.
///
/// Consuming conditions reserve and subtract their quantity when the rule
/// fires; non-consuming ones are promoter-style presence checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub object: Object,
    pub quantity: Quantity,
    pub consuming: bool,
    pub source: SourceRef,
}

impl Condition {
    /// Consuming condition on the local multiset.
    pub fn consuming(object: impl Into<Object>, quantity: impl Into<Quantity>) -> Self {
        Self {
            object: object.into(),
            quantity: quantity.into(),
            consuming: true,
            source: SourceRef::Local,
        }
    }

    /// Promoter-style check: requires presence, reserves nothing.
    pub fn promoter(object: impl Into<Object>, quantity: impl Into<Quantity>) -> Self {
        Self {
            object: object.into(),
            quantity: quantity.into(),
            consuming: false,
            source: SourceRef::Local,
        }
    }

    pub fn from_source(mut self, source: SourceRef) -> Self {
        self.source = source;
        self
    }

    /// The tunnel this condition must resolve at fetch time, if any.
    pub fn required_tunnel(&self) -> Option<(TunnelKind, Option<&str>)> {
        match &self.source {
            SourceRef::Local => None,
            SourceRef::Neighbor(name) => Some((TunnelKind::Go, Some(name.as_str()))),
            SourceRef::AnyVia(kind) => Some((*kind, None)),
        }
    }
}
