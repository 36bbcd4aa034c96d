//! Rule results - what a firing rule produces and where it goes

use serde::{Deserialize, Serialize};

use crate::object::Object;
use crate::rules::condition::Quantity;
use crate::tunnel::TunnelKind;

/// Where produced objects are delivered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Destination {
    /// The producing membrane's own multiset.
    #[default]
    Local,
    /// Enqueued on a tunnel of the given kind, optionally narrowed to a
    /// target membrane name (In/Go tunnels can have several peers).
    Via {
        kind: TunnelKind,
        target: Option<String>,
    },
}

/// Production of a quantity of one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectResult {
    pub object: Object,
    pub quantity: Quantity,
    pub destination: Destination,
}

impl ObjectResult {
    /// Produce `quantity` of `object` into the local multiset.
    pub fn local(object: impl Into<Object>, quantity: impl Into<Quantity>) -> Self {
        Self {
            object: object.into(),
            quantity: quantity.into(),
            destination: Destination::Local,
        }
    }

    /// Produce through a tunnel of the given kind.
    pub fn via(
        object: impl Into<Object>,
        quantity: impl Into<Quantity>,
        kind: TunnelKind,
        target: Option<String>,
    ) -> Self {
        Self {
            object: object.into(),
            quantity: quantity.into(),
            destination: Destination::Via { kind, target },
        }
    }
}

/// Replaces the firing membrane with two daughter clones; each daughter
/// additionally receives its own object-result set (applied locally).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DivisionResult {
    pub daughter1: Vec<ObjectResult>,
    pub daughter2: Vec<ObjectResult>,
}

/// One product of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleResult {
    Object(ObjectResult),
    Division(DivisionResult),
    /// Remove the membrane and merge its contents into the parent.
    Dissolution,
}

impl RuleResult {
    /// True for results that restructure the membrane tree.
    pub fn is_structural(&self) -> bool {
        matches!(self, RuleResult::Division(_) | RuleResult::Dissolution)
    }

    /// Bound-variable names this result depends on.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            RuleResult::Object(or) => or.quantity.as_bound().into_iter().collect(),
            RuleResult::Division(div) => div
                .daughter1
                .iter()
                .chain(div.daughter2.iter())
                .filter_map(|or| or.quantity.as_bound())
                .collect(),
            RuleResult::Dissolution => Vec::new(),
        }
    }
}
