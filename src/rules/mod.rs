//! Rule model: conditions, results, rules, and the TOML definition loader

pub mod condition;
pub mod loader;
pub mod result;
pub mod rule;

pub use condition::{Condition, Quantity, SourceRef};
pub use result::{Destination, DivisionResult, ObjectResult, RuleResult};
pub use rule::Rule;
