//! Simulation configuration with documented constants
//!
//! Everything a step driver can tune lives here so individual runs are
//! reproducible from one value set.

/// Parallelism policy applied to the schedule between usable-rule
/// resolution and fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parallelism {
    /// Fire every rule as many times as the maximal schedule allows.
    #[default]
    Maximal,
    /// Clamp every fireable rule to a single application per step.
    Minimal,
}

/// Configuration for the step driver
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Upper bound on global steps for [`crate::simulation::run`].
    ///
    /// P systems commonly halt by quiescence, but a buggy model can loop
    /// forever; this bound keeps runs finite.
    pub max_steps: u64,

    /// Stop as soon as a step fires no rule anywhere in the tree.
    pub halt_on_quiescence: bool,

    /// Schedule trimming policy applied before fetch.
    pub parallelism: Parallelism,

    /// Seed for the system RNG (Random-tunnel target selection).
    ///
    /// Identical seeds and inputs produce identical runs.
    pub rng_seed: u64,

    /// Indent unit used by the membrane dump rendering.
    pub dump_indent: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            halt_on_quiescence: true,
            parallelism: Parallelism::Maximal,
            rng_seed: 0,
            dump_indent: "  ".to_string(),
        }
    }
}
