//! Integration tests for the step driver and tunnel delivery

use std::cell::RefCell;
use std::rc::Rc;

use psim::core::config::{Parallelism, SimulationConfig};
use psim::core::types::MembraneId;
use psim::listener::{EventLog, SystemEvent};
use psim::membrane::dump::{render, DumpOptions};
use psim::membrane::Membrane;
use psim::object::Object;
use psim::rules::{Condition, ObjectResult, Quantity, Rule, RuleResult};
use psim::simulation;
use psim::system::MembraneSystem;
use psim::tunnel::{Tunnel, TunnelKind};

/// Log capture for failing tests; filter via RUST_LOG.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn q(system: &MembraneSystem, id: MembraneId, name: &str) -> u64 {
    system.membrane(id).unwrap().quantity_of(&Object::new(name))
}

/// Environment with one child that pumps everything it holds to its parent,
/// one object per step.
fn pumping_system() -> (MembraneSystem, MembraneId, MembraneId) {
    init_tracing();
    let mut system = MembraneSystem::new();
    let env = system.new_membrane("Environment");
    let mut cell = Membrane::new("cell");
    cell.add_object("d", 4);
    cell.add_rule(
        Rule::new("pump")
            .with_condition(Condition::consuming("d", 1))
            .with_result(RuleResult::Object(ObjectResult::via(
                "d",
                1,
                TunnelKind::Out,
                None,
            ))),
    );
    let cell = system.insert(cell);
    system.add_child(env, cell).unwrap();
    (system, env, cell)
}

#[test]
fn test_maximal_step_moves_everything_at_once() {
    let (mut system, env, cell) = pumping_system();
    let config = SimulationConfig::default();
    let report = simulation::run_step(&mut system, &config, 0).unwrap();
    assert!(!report.quiescent);
    assert_eq!(q(&system, cell, "d"), 0);
    assert_eq!(q(&system, env, "d"), 4);
}

#[test]
fn test_minimal_steps_move_one_per_step() {
    let (mut system, env, cell) = pumping_system();
    let config = SimulationConfig {
        parallelism: Parallelism::Minimal,
        ..Default::default()
    };
    for step in 0..3 {
        simulation::run_step(&mut system, &config, step).unwrap();
    }
    assert_eq!(q(&system, cell, "d"), 1);
    assert_eq!(q(&system, env, "d"), 3);
}

#[test]
fn test_run_halts_on_quiescence() {
    let (mut system, _env, _cell) = pumping_system();
    let config = SimulationConfig::default();
    let reports = simulation::run(&mut system, &config).unwrap();
    // One working step, one quiescent step.
    assert_eq!(reports.len(), 2);
    assert!(reports[1].quiescent);
}

#[test]
fn test_runs_are_deterministic() {
    let fired = |seed: u64| -> Vec<(MembraneId, String, u64)> {
        let mut system = MembraneSystem::with_seed(seed);
        let env = system.new_membrane("Environment");
        let mut cell = Membrane::new("cell");
        cell.add_object("d", 9);
        cell.add_rule(
            Rule::new("a")
                .with_condition(Condition::consuming("d", 2))
                .with_result(RuleResult::Object(ObjectResult::local("e", 1))),
        );
        cell.add_rule(
            Rule::new("b")
                .with_condition(Condition::consuming("d", Quantity::Bound("n".to_string())))
                .with_result(RuleResult::Object(ObjectResult::via(
                    "d",
                    Quantity::Bound("n".to_string()),
                    TunnelKind::Out,
                    None,
                ))),
        );
        let cell = system.insert(cell);
        system.add_child(env, cell).unwrap();
        let config = SimulationConfig::default();
        simulation::run(&mut system, &config)
            .unwrap()
            .into_iter()
            .flat_map(|r| r.fired)
            .collect()
    };
    assert_eq!(fired(7), fired(7));
}

#[test]
fn test_step_completed_event_carries_totals() {
    let (mut system, _env, _cell) = pumping_system();
    let log = Rc::new(RefCell::new(EventLog::default()));
    system.add_listener(Box::new(Rc::clone(&log)));

    let config = SimulationConfig::default();
    simulation::run_step(&mut system, &config, 0).unwrap();

    let totals: Vec<u64> = log
        .borrow()
        .events
        .iter()
        .filter_map(|e| match e {
            SystemEvent::StepCompleted { rules_fired, .. } => Some(*rules_fired),
            _ => None,
        })
        .collect();
    assert_eq!(totals, vec![4]);
}

#[test]
fn test_neighbor_delivery_through_go_tunnel() {
    let mut system = MembraneSystem::new();
    let a = system.new_membrane("a");
    let b = system.new_membrane("b");
    system.add_neighbor(a, b).unwrap();

    let membrane = system.membrane_mut(a).unwrap();
    membrane.add_object("d", 2);
    membrane.add_rule(
        Rule::new("hand_over")
            .with_condition(Condition::consuming("d", 1))
            .with_result(RuleResult::Object(ObjectResult::via(
                "d",
                1,
                TunnelKind::Go,
                Some("b".to_string()),
            ))),
    );

    let config = SimulationConfig::default();
    simulation::run_step(&mut system, &config, 0).unwrap();
    assert_eq!(q(&system, a, "d"), 0);
    assert_eq!(q(&system, b, "d"), 2);
}

#[test]
fn test_here_tunnel_loops_back_to_owner() {
    let mut system = MembraneSystem::new();
    let cell = system.new_membrane("cell");
    let membrane = system.membrane_mut(cell).unwrap();
    membrane.add_object("d", 2);
    membrane.add_rule(
        Rule::new("recycle")
            .with_condition(Condition::consuming("d", 1))
            .with_result(RuleResult::Object(ObjectResult::via(
                "e",
                1,
                TunnelKind::Here,
                None,
            ))),
    );
    membrane.add_tunnel(Tunnel::new(TunnelKind::Here, cell, cell));

    let config = SimulationConfig::default();
    simulation::run_step(&mut system, &config, 0).unwrap();
    assert_eq!(q(&system, cell, "d"), 0);
    assert_eq!(q(&system, cell, "e"), 2);
}

#[test]
fn test_fetch_atomicity_leaves_multiset_untouched() {
    // A rule whose output needs a Go tunnel that does not exist must leave
    // the multiset exactly as if it had never been selected.
    let mut system = MembraneSystem::new();
    let env = system.new_membrane("Environment");
    let mut cell = Membrane::new("cell");
    cell.add_object("d", 5);
    cell.add_rule(
        Rule::new("miswired")
            .with_condition(Condition::consuming("d", 1))
            .with_result(RuleResult::Object(ObjectResult::via(
                "d",
                1,
                TunnelKind::Go,
                Some("nowhere".to_string()),
            ))),
    );
    let cell = system.insert(cell);
    system.add_child(env, cell).unwrap();

    let config = SimulationConfig::default();
    let report = simulation::run_step(&mut system, &config, 0).unwrap();
    assert!(report.quiescent);
    assert_eq!(q(&system, cell, "d"), 5);
}

#[test]
fn test_dump_renders_tree_with_toggles() {
    let (mut system, env, _cell) = pumping_system();
    system.membrane_mut(env).unwrap().add_object("x", 1);

    let full = render(&system, env, &DumpOptions::default());
    assert!(full.contains("membrane 'Environment'"));
    assert!(full.contains("membrane 'cell'"));
    assert!(full.contains("object d x4"));
    assert!(full.contains("rule 'pump'"));
    assert!(full.contains("tunnel In"));

    let bare = render(
        &system,
        env,
        &DumpOptions {
            objects: false,
            properties: false,
            rules: false,
            submembranes: false,
            tunnels: false,
            indent: "    ".to_string(),
        },
    );
    assert!(bare.contains("membrane 'Environment'"));
    assert!(!bare.contains("cell"));
    assert!(!bare.contains("object"));
}
