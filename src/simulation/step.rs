//! One global step: three phases per membrane, then a tunnel drain
//!
//! The driver owns inter-membrane ordering (ascending id, so daughters
//! created by a division run from the next step on) and the parallelism
//! policy; correctness within one membrane's phase sequence is the core's
//! job. Membranes whose evaluation raises a structural condition are logged
//! and skipped rather than aborting the whole step.

use crate::core::config::{Parallelism, SimulationConfig};
use crate::core::error::{PsimError, Result};
use crate::core::types::{MembraneId, Step};
use crate::listener::SystemEvent;
use crate::system::MembraneSystem;

/// What one global step did.
#[derive(Debug)]
pub struct StepReport {
    pub step: Step,
    /// (membrane, rule, applications) for every rule that applied.
    pub fired: Vec<(MembraneId, String, u64)>,
    /// Membranes skipped because a phase raised a structural condition.
    pub skipped: Vec<(MembraneId, PsimError)>,
    /// No rule fired anywhere this step.
    pub quiescent: bool,
}

/// Run one global step over every live membrane.
pub fn run_step(
    system: &mut MembraneSystem,
    config: &SimulationConfig,
    step: Step,
) -> Result<StepReport> {
    let ids = system.live_ids();
    for id in &ids {
        if let Some(membrane) = system.membrane_mut(*id) {
            membrane.new_step_init();
        }
    }

    let mut fired: Vec<(MembraneId, String, u64)> = Vec::new();
    let mut skipped: Vec<(MembraneId, PsimError)> = Vec::new();

    for id in ids {
        // An earlier membrane's division or dissolution may have removed it.
        if !system.membrane(id).is_some_and(|m| !m.is_deleted()) {
            continue;
        }

        let mut schedule = match system.membrane(id).map(|m| m.get_usable_rules()) {
            Some(Ok(schedule)) => schedule,
            Some(Err(error)) => {
                tracing::warn!("step {}: skipping membrane {}: {}", step, id, error);
                skipped.push((id, error));
                continue;
            }
            None => continue,
        };
        if config.parallelism == Parallelism::Minimal {
            schedule.clamp_to_single();
        }

        let committed = match system.fetch(id, schedule) {
            Ok(committed) => committed,
            Err(error) => {
                tracing::warn!("step {}: fetch failed on membrane {}: {}", step, id, error);
                skipped.push((id, error));
                continue;
            }
        };

        match system.set_products(id, committed) {
            Ok(applied) => {
                fired.extend(applied.into_iter().map(|(rule, count)| (id, rule, count)));
            }
            Err(error) => {
                tracing::warn!(
                    "step {}: product application failed on membrane {}: {}",
                    step,
                    id,
                    error
                );
                skipped.push((id, error));
            }
        }
    }

    system.drain_all_tunnels();

    let rules_fired: u64 = fired.iter().map(|(_, _, count)| *count).sum();
    system.notify(SystemEvent::StepCompleted { step, rules_fired });
    tracing::debug!("step {} fired {} rule application(s)", step, rules_fired);

    Ok(StepReport {
        step,
        fired,
        skipped,
        quiescent: rules_fired == 0,
    })
}

/// Run steps until quiescence (if configured) or the step bound.
pub fn run(system: &mut MembraneSystem, config: &SimulationConfig) -> Result<Vec<StepReport>> {
    let mut reports = Vec::new();
    for step in 0..config.max_steps {
        let report = run_step(system, config, step)?;
        let quiescent = report.quiescent;
        reports.push(report);
        if quiescent && config.halt_on_quiescence {
            break;
        }
    }
    Ok(reports)
}
