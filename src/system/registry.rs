//! Membrane-class registry - template storage and clone-based instantiation
//!
//! Instantiation is always a deep clone of the registered template, never a
//! re-run of construction logic, so a class behaves identically however its
//! template was built, and division reuses the same clone primitive.

use ahash::AHashMap;

use crate::core::error::{PsimError, Result};
use crate::core::types::MembraneId;
use crate::membrane::Membrane;
use crate::system::MembraneSystem;

struct RegisteredClass {
    template: Membrane,
    /// True for natively-implemented classes, false for data-defined ones.
    predefined: bool,
}

/// Maps class name to template membrane.
#[derive(Default)]
pub struct MembraneRegistry {
    classes: AHashMap<String, RegisteredClass>,
}

impl MembraneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, template: Membrane, predefined: bool) {
        self.classes.insert(
            name.into(),
            RegisteredClass {
                template,
                predefined,
            },
        );
    }

    pub fn template(&self, name: &str) -> Option<&Membrane> {
        self.classes.get(name).map(|c| &c.template)
    }

    pub fn is_predefined(&self, name: &str) -> bool {
        self.classes.get(name).map(|c| c.predefined).unwrap_or(false)
    }

    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Clone the template into a fresh, unwired membrane.
    pub fn instantiate(&self, name: &str) -> Result<Membrane> {
        let class = self
            .classes
            .get(name)
            .ok_or_else(|| PsimError::UnknownMembraneClass(name.to_string()))?;
        Ok(class.template.clone_structure())
    }

    /// Clone the template straight into a system's arena.
    pub fn instantiate_into(&self, system: &mut MembraneSystem, name: &str) -> Result<MembraneId> {
        Ok(system.insert(self.instantiate(name)?))
    }
}
