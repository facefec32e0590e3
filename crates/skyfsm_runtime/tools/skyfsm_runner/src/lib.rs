//! skyfsm_runner
//!
//! Loads a mission document and runs it against the simulated vehicle.

pub mod config;
pub mod sighting;

use std::path::Path;

use anyhow::{Context, Result};
use skyfsm_core::mission::{self, transition_graph, MissionDefinition};
use tracing::{info, warn};

/// Parse and validate a mission document. `.json` files are read as JSON,
/// anything else as YAML.
pub fn load_mission(path: &Path) -> Result<MissionDefinition> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read mission document {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let definition = if is_json {
        mission::build_json(&text)
    } else {
        mission::build(&text)
    };
    definition.with_context(|| format!("invalid mission document {}", path.display()))
}

/// Log graph problems that do not make a mission invalid but are likely
/// mistakes. Returns how many were found.
pub fn report_graph(definition: &MissionDefinition) -> usize {
    let graph = transition_graph(definition);
    let mut findings = 0;

    for state in graph.unreachable_states() {
        warn!(mission = definition.name(), state, "state is unreachable from start");
        findings += 1;
    }
    for state in graph.dead_ends() {
        warn!(mission = definition.name(), state, "state has no outgoing transition");
        findings += 1;
    }
    if !graph.terminate_reachable() {
        warn!(mission = definition.name(), "TERMINATE is not reachable, mission only ends by stop or failsafe");
        findings += 1;
    }

    info!(
        mission = definition.name(),
        states = graph.states.len(),
        transitions = graph.transitions.len(),
        findings,
        "mission graph checked"
    );
    findings
}
