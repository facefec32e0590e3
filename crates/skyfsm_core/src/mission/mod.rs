//! skyfsm_core::mission
//!
//! Async-free mission model: the immutable graph the scheduler executes.
//! This module intentionally contains **no** runtime or vehicle code.
//!
//! Key ideas:
//! - Actions are states; events interrupt them; the transition table says where to go
//! - Combinator events (`and`, `not`) are resolved into trees once, at build time
//! - `done` and `error` are implicit events raised by the action itself
//! - `TERMINATE` is the only terminal target

mod definition;
mod graph;
mod spec;
mod table;
mod target;
mod tree;

pub use definition::{MissionBuilder, MissionDefinition, MissionDoc, TransitionRow};
pub use graph::{transition_graph, TransitionEdge, TransitionGraph};
pub use spec::{duration, ActionKind, ActionSpec, EventKind, EventSpec, GeoPoint, PidGains};
pub use table::TransitionTable;
pub use target::{Target, TERMINATE};
pub use tree::{resolve_events, EventTree};

use crate::error::Result;

/// Implicit event raised when an action completes naturally.
pub const DONE_EVENT: &str = "done";

/// Implicit event raised when an action's execution fails.
pub const ERROR_EVENT: &str = "error";

/// Parse and validate a YAML mission document.
pub fn build(text: &str) -> Result<MissionDefinition> {
    let doc: MissionDoc = serde_yaml::from_str(text)?;
    MissionDefinition::from_doc(doc)
}

/// Parse and validate a JSON mission document.
pub fn build_json(text: &str) -> Result<MissionDefinition> {
    let doc: MissionDoc = serde_json::from_str(text)?;
    MissionDefinition::from_doc(doc)
}
