//! Observer hooks for object, rule and structural events
//!
//! Listeners live on the system, not inside membranes, so deep cloning a
//! membrane stays a total structural copy. Notification is synchronous and
//! happens after the state mutation it describes, so a listener cannot
//! corrupt the phase it observes.

use crate::core::types::{MembraneId, Step};
use crate::object::Object;

/// Events generated while a system evolves
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    /// An object's quantity changed on a membrane.
    ObjectChanged {
        membrane: MembraneId,
        object: Object,
        /// Signed change applied.
        delta: i64,
        /// Quantity after the change.
        quantity: u64,
    },
    /// A rule committed and applied its results.
    RuleFired {
        membrane: MembraneId,
        rule: String,
        count: u64,
    },
    MembraneCreated {
        membrane: MembraneId,
    },
    MembraneDivided {
        original: MembraneId,
        daughters: (MembraneId, MembraneId),
    },
    MembraneDissolved {
        membrane: MembraneId,
        parent: MembraneId,
    },
    MembraneDeleted {
        membrane: MembraneId,
    },
    /// A global step finished.
    StepCompleted {
        step: Step,
        rules_fired: u64,
    },
}

/// Observer of system evolution.
pub trait SystemListener {
    fn on_event(&mut self, event: &SystemEvent);
}

/// Listener that records every event, for tests and debugging UIs.
#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<SystemEvent>,
}

impl SystemListener for EventLog {
    fn on_event(&mut self, event: &SystemEvent) {
        self.events.push(event.clone());
    }
}

/// Shared handle so a caller can keep reading the log after handing the
/// listener to the system.
impl SystemListener for std::rc::Rc<std::cell::RefCell<EventLog>> {
    fn on_event(&mut self, event: &SystemEvent) {
        self.borrow_mut().on_event(event);
    }
}
