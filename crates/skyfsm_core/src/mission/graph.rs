use std::collections::{BTreeSet, VecDeque};

use super::{MissionDefinition, Target};

/// Mission transition graph derived from the transition table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TransitionGraph {
    pub start: String,
    pub states: Vec<String>,
    pub transitions: Vec<TransitionEdge>,
}

/// Directed mission transition edge.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TransitionEdge {
    pub start: String,
    pub event: String,
    pub goal: Target,
}

/// Build the mission's transition graph.
pub fn transition_graph(mission: &MissionDefinition) -> TransitionGraph {
    let transitions = mission
        .transitions()
        .iter()
        .map(|(state, event, target)| TransitionEdge {
            start: state.to_string(),
            event: event.to_string(),
            goal: target.clone(),
        })
        .collect();

    TransitionGraph {
        start: mission.start_state().to_string(),
        states: mission.state_ids().into_iter().map(str::to_string).collect(),
        transitions,
    }
}

impl TransitionGraph {
    /// Targets reachable from the start state (including the start state).
    pub fn reachable(&self) -> BTreeSet<Target> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([Target::State(self.start.clone())]);

        while let Some(node) = queue.pop_front() {
            if !seen.insert(node.clone()) {
                continue;
            }
            if let Target::State(state) = &node {
                for edge in self.transitions.iter().filter(|e| &e.start == state) {
                    queue.push_back(edge.goal.clone());
                }
            }
        }
        seen
    }

    /// True if some path from the start state ends in `TERMINATE`.
    pub fn terminate_reachable(&self) -> bool {
        self.reachable().contains(&Target::Terminate)
    }

    /// Declared states that no path from the start state can enter.
    pub fn unreachable_states(&self) -> Vec<&str> {
        let reachable = self.reachable();
        self.states
            .iter()
            .filter(|s| !reachable.contains(&Target::State((*s).clone())))
            .map(String::as_str)
            .collect()
    }

    /// States with no outgoing row at all: whatever ends their action is fatal.
    pub fn dead_ends(&self) -> Vec<&str> {
        self.states
            .iter()
            .filter(|s| !self.transitions.iter().any(|e| &e.start == *s))
            .map(String::as_str)
            .collect()
    }
}
