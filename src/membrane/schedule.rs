//! Schedules - the (rule, count) outcome of usable-rule resolution
//!
//! A schedule is produced by `get_usable_rules`, optionally trimmed by the
//! driver (parallelism policy), committed by `fetch`, and applied by
//! `set_products`. Entries keep registration order.

use ahash::AHashMap;

/// One rule selected for this step, with its resolved bindings.
#[derive(Debug, Clone)]
pub struct ScheduledRule {
    /// Index into the membrane's registration-ordered rule list.
    pub rule_index: usize,
    pub rule_name: String,
    /// How many simultaneous applications this step. Zero means the rule is
    /// present but not fireable.
    pub count: u64,
    /// Bound-variable values resolved for this evaluation.
    pub bindings: AHashMap<String, u64>,
}

/// Rule -> count mapping for one membrane and one step.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub entries: Vec<ScheduledRule>,
}

impl Schedule {
    pub fn count_of(&self, rule_name: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.rule_name == rule_name)
            .map(|e| e.count)
    }

    /// Lower a rule's count. Raising is refused: fetch relies on counts
    /// never exceeding what resolution reserved.
    pub fn trim(&mut self, rule_name: &str, count: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.rule_name == rule_name) {
            if count < entry.count {
                entry.count = count;
            }
        }
    }

    /// Clamp every fireable rule to one application (minimal parallelism).
    pub fn clamp_to_single(&mut self) {
        for entry in &mut self.entries {
            entry.count = entry.count.min(1);
        }
    }

    /// Total rule applications across all entries.
    pub fn total_applications(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }

    /// True when nothing would fire.
    pub fn is_idle(&self) -> bool {
        self.entries.iter().all(|e| e.count == 0)
    }
}
