//! Human-readable membrane dump for debugging and tests
//!
//! Not a persisted format; every toggle defaults to on.

use std::fmt::Write as _;

use crate::core::types::MembraneId;
use crate::system::MembraneSystem;

/// Detail toggles for [`render`].
#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub objects: bool,
    pub properties: bool,
    pub rules: bool,
    pub submembranes: bool,
    pub tunnels: bool,
    /// Indent unit prepended once per tree depth.
    pub indent: String,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            objects: true,
            properties: true,
            rules: true,
            submembranes: true,
            tunnels: true,
            indent: "  ".to_string(),
        }
    }
}

/// Render a membrane subtree rooted at `id`.
pub fn render(system: &MembraneSystem, id: MembraneId, options: &DumpOptions) -> String {
    let mut out = String::new();
    render_into(system, id, options, 0, &mut out);
    out
}

fn render_into(
    system: &MembraneSystem,
    id: MembraneId,
    options: &DumpOptions,
    depth: usize,
    out: &mut String,
) {
    let Some(membrane) = system.membrane(id) else {
        return;
    };
    let pad = options.indent.repeat(depth);
    let inner = options.indent.repeat(depth + 1);

    let _ = writeln!(
        out,
        "{pad}membrane '{}' {}{}",
        membrane.name,
        membrane.id,
        if membrane.is_deleted() { " (deleted)" } else { "" }
    );

    if options.objects {
        for (object, quantity) in membrane.sorted_objects() {
            let _ = writeln!(out, "{inner}object {object} x{quantity}");
        }
    }

    if options.properties {
        let mut names: Vec<&String> = membrane.properties().keys().collect();
        names.sort();
        for name in names {
            let _ = writeln!(out, "{inner}property {name} = {:?}", membrane.properties()[name]);
        }
    }

    if options.rules {
        for rule in membrane.rules() {
            let _ = writeln!(
                out,
                "{inner}rule '{}' ({} condition(s), {} result(s))",
                rule.name,
                rule.conditions.len(),
                rule.results.len()
            );
        }
    }

    if options.tunnels {
        for tunnel in membrane.tunnels() {
            let targets: Vec<String> = tunnel.targets().iter().map(|t| t.to_string()).collect();
            let _ = writeln!(
                out,
                "{inner}tunnel {:?} -> [{}]{}",
                tunnel.kind,
                targets.join(", "),
                if tunnel.is_open() { "" } else { " (closed)" }
            );
        }
    }

    if options.submembranes {
        for child in system.children_of(id) {
            render_into(system, child, options, depth + 1, out);
        }
    }
}
