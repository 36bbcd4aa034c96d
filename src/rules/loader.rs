//! Load membrane-class definitions from TOML files
//!
//! The rule-definition language proper is out of scope; this loader gives
//! data-defined membrane classes a concrete shape: objects, rules with
//! condition/result specs, and properties, registered as templates in a
//! [`MembraneRegistry`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::core::error::{PsimError, Result};
use crate::membrane::{Membrane, PropertyValue};
use crate::rules::{
    Condition, DivisionResult, ObjectResult, Quantity, Rule, RuleResult, SourceRef,
};
use crate::system::MembraneRegistry;
use crate::tunnel::TunnelKind;

#[derive(Debug, Deserialize)]
struct DefinitionFile {
    #[serde(default)]
    classes: BTreeMap<String, ClassSpec>,
}

#[derive(Debug, Deserialize)]
struct ClassSpec {
    #[serde(default)]
    objects: BTreeMap<String, u64>,
    #[serde(default)]
    properties: BTreeMap<String, PropertySpec>,
    #[serde(default)]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PropertySpec {
    Bool(bool),
    Num(f64),
    Str(String),
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    name: String,
    #[serde(default)]
    conditions: Vec<ConditionSpec>,
    #[serde(default)]
    results: Vec<ResultSpec>,
}

/// A quantity is a count or a bound-variable name.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuantitySpec {
    Count(u64),
    Variable(String),
}

impl QuantitySpec {
    fn into_quantity(self) -> Quantity {
        match self {
            QuantitySpec::Count(n) => Quantity::Literal(n),
            QuantitySpec::Variable(v) => Quantity::Bound(v),
        }
    }
}

fn default_quantity() -> QuantitySpec {
    QuantitySpec::Count(1)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ConditionSpec {
    object: String,
    #[serde(default = "default_quantity")]
    quantity: QuantitySpec,
    #[serde(default = "default_true")]
    consuming: bool,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResultSpec {
    Dissolve {
        dissolve: bool,
    },
    Divide {
        divide: DivideSpec,
    },
    Object(ObjectResultSpec),
}

#[derive(Debug, Deserialize)]
struct DivideSpec {
    #[serde(default)]
    daughter1: Vec<ObjectResultSpec>,
    #[serde(default)]
    daughter2: Vec<ObjectResultSpec>,
}

#[derive(Debug, Deserialize)]
struct ObjectResultSpec {
    object: String,
    #[serde(default = "default_quantity")]
    quantity: QuantitySpec,
    #[serde(default)]
    destination: Option<String>,
}

fn tunnel_kind(text: &str) -> Result<TunnelKind> {
    match text {
        "in" => Ok(TunnelKind::In),
        "out" => Ok(TunnelKind::Out),
        "go" => Ok(TunnelKind::Go),
        "here" => Ok(TunnelKind::Here),
        "random" => Ok(TunnelKind::Random),
        "all" => Ok(TunnelKind::All),
        other => Err(PsimError::InvalidDefinition(format!(
            "unknown tunnel kind '{other}'"
        ))),
    }
}

/// `"here"`/absent, `"neighbor:<name>"`, or `"any:<kind>"`.
fn parse_source(source: Option<&str>) -> Result<SourceRef> {
    match source {
        None | Some("here") | Some("local") => Ok(SourceRef::Local),
        Some(text) => match text.split_once(':') {
            Some(("neighbor", name)) => Ok(SourceRef::Neighbor(name.to_string())),
            Some(("any", kind)) => Ok(SourceRef::AnyVia(tunnel_kind(kind)?)),
            _ => Err(PsimError::InvalidDefinition(format!(
                "unknown condition source '{text}'"
            ))),
        },
    }
}

/// `"here"`/absent, a bare kind (`"out"`, `"all"`, ...), or
/// `"<kind>:<target name>"`.
fn parse_destination(destination: Option<&str>) -> Result<crate::rules::Destination> {
    use crate::rules::Destination;
    match destination {
        None | Some("here") | Some("local") => Ok(Destination::Local),
        Some(text) => match text.split_once(':') {
            Some((kind, target)) => Ok(Destination::Via {
                kind: tunnel_kind(kind)?,
                target: Some(target.to_string()),
            }),
            None => Ok(Destination::Via {
                kind: tunnel_kind(text)?,
                target: None,
            }),
        },
    }
}

fn build_object_result(spec: ObjectResultSpec) -> Result<ObjectResult> {
    Ok(ObjectResult {
        object: spec.object.into(),
        quantity: spec.quantity.into_quantity(),
        destination: parse_destination(spec.destination.as_deref())?,
    })
}

fn build_rule(spec: RuleSpec) -> Result<Rule> {
    let mut rule = Rule::new(spec.name);
    for condition in spec.conditions {
        rule.conditions.push(Condition {
            object: condition.object.into(),
            quantity: condition.quantity.into_quantity(),
            consuming: condition.consuming,
            source: parse_source(condition.source.as_deref())?,
        });
    }
    for result in spec.results {
        let built = match result {
            ResultSpec::Dissolve { dissolve } => {
                if !dissolve {
                    return Err(PsimError::InvalidDefinition(
                        "'dissolve = false' has no meaning".to_string(),
                    ));
                }
                RuleResult::Dissolution
            }
            ResultSpec::Divide { divide } => {
                let mut division = DivisionResult::default();
                for daughter in divide.daughter1 {
                    division.daughter1.push(build_object_result(daughter)?);
                }
                for daughter in divide.daughter2 {
                    division.daughter2.push(build_object_result(daughter)?);
                }
                RuleResult::Division(division)
            }
            ResultSpec::Object(object) => RuleResult::Object(build_object_result(object)?),
        };
        rule.results.push(built);
    }
    Ok(rule)
}

fn build_template(name: &str, spec: ClassSpec) -> Result<Membrane> {
    let mut template = Membrane::new(name);
    for (object, quantity) in spec.objects {
        template.add_object(object, quantity);
    }
    for (property, value) in spec.properties {
        let value = match value {
            PropertySpec::Bool(b) => PropertyValue::Bool(b),
            PropertySpec::Num(n) => PropertyValue::Num(n),
            PropertySpec::Str(s) => PropertyValue::Str(s),
        };
        template.set_property(property, value);
    }
    for rule in spec.rules {
        template.add_rule(build_rule(rule)?);
    }
    Ok(template)
}

/// Parse a definition document into a registry of data-defined classes.
pub fn parse_registry(text: &str) -> Result<MembraneRegistry> {
    let file: DefinitionFile = toml::from_str(text)?;
    let mut registry = MembraneRegistry::new();
    for (name, class) in file.classes {
        let template = build_template(&name, class)?;
        registry.register(name, template, false);
    }
    Ok(registry)
}

/// Load a definition file from disk.
pub fn load_registry(path: &Path) -> Result<MembraneRegistry> {
    let text = fs::read_to_string(path)?;
    parse_registry(&text)
}
