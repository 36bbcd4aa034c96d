//! Symbolic objects - the resource unit of the multiset model

use serde::{Deserialize, Serialize};

/// An immutable symbolic token identified by name.
///
/// Multiplicity is always tracked by the owning membrane's multiset
/// (`Object -> quantity`), never by repeating instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object(String);

impl Object {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Object {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Object {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_equality_by_name() {
        assert_eq!(Object::new("d"), Object::from("d"));
        assert_ne!(Object::new("d"), Object::new("e"));
    }

    #[test]
    fn test_object_as_map_key() {
        use ahash::AHashMap;
        let mut multiset: AHashMap<Object, u64> = AHashMap::new();
        multiset.insert(Object::new("d"), 3);
        *multiset.entry(Object::new("d")).or_insert(0) += 2;
        assert_eq!(multiset[&Object::new("d")], 5);
    }
}
