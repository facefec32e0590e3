use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

use super::{
    resolve_events, ActionKind, ActionSpec, EventKind, EventSpec, EventTree, Target,
    TransitionTable, DONE_EVENT, ERROR_EVENT, TERMINATE,
};

/// Serialized mission as produced by the mission compiler.
///
/// ```yaml
/// name: perimeter
/// start: detect
/// actions:
///   - { id: detect, kind: patrol, waypoints: [{ lat: 1.0, lon: 2.0, alt: 10.0 }] }
///   - { id: track, kind: track, source: cam, class: person }
/// events:
///   - { id: person_detected, kind: object_detected, source: cam, class: person }
///   - { id: lost, kind: object_lost, source: cam, class: person, grace_seconds: 2 }
/// transitions:
///   - { state: detect, event: person_detected, next: track }
///   - { state: track, event: lost, next: detect }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionDoc {
    #[serde(default)]
    pub name: Option<String>,
    pub start: String,
    pub actions: Vec<ActionSpec>,
    #[serde(default)]
    pub events: Vec<EventSpec>,
    #[serde(default)]
    pub transitions: Vec<TransitionRow>,
}

/// One `during <state>: <event> -> <next>` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRow {
    pub state: String,
    pub event: String,
    pub next: String,
}

/// Validated, immutable mission: actions, resolved event trees, transition
/// table and start state.
///
/// Only constructible through [`MissionDefinition::from_doc`] (or the
/// [`MissionBuilder`] / `build*` helpers that call it), so every value of this
/// type has passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct MissionDefinition {
    name: String,
    actions: BTreeMap<String, ActionSpec>,
    events: BTreeMap<String, EventTree>,
    transitions: TransitionTable,
    start_state: String,
}

impl MissionDefinition {
    pub fn from_doc(doc: MissionDoc) -> Result<Self> {
        let MissionDoc {
            name,
            start,
            actions: action_list,
            events: event_list,
            transitions: rows,
        } = doc;

        if action_list.is_empty() {
            return Err(CoreError::validation("mission declares no actions", start));
        }

        let mut actions = BTreeMap::new();
        for spec in action_list {
            check_declared_id(&spec.id)?;
            spec.kind.validate(&spec.id)?;
            if actions.contains_key(&spec.id) {
                return Err(CoreError::validation("duplicate action id", spec.id));
            }
            actions.insert(spec.id.clone(), spec);
        }

        let mut event_specs = BTreeMap::new();
        for spec in event_list {
            check_declared_id(&spec.id)?;
            spec.kind.validate(&spec.id)?;
            if actions.contains_key(&spec.id) {
                return Err(CoreError::validation(
                    "event id collides with an action id",
                    spec.id,
                ));
            }
            if event_specs.contains_key(&spec.id) {
                return Err(CoreError::validation("duplicate event id", spec.id));
            }
            event_specs.insert(spec.id.clone(), spec);
        }
        let events = resolve_events(&event_specs)?;

        if !actions.contains_key(&start) {
            return Err(CoreError::validation(
                "start state is not a declared action",
                start,
            ));
        }

        let mut transitions = TransitionTable::new();
        for row in rows {
            if !actions.contains_key(&row.state) {
                return Err(CoreError::validation(
                    "transition names an undeclared state",
                    row.state,
                ));
            }
            let implicit = row.event == DONE_EVENT || row.event == ERROR_EVENT;
            if !implicit && !events.contains_key(&row.event) {
                return Err(CoreError::validation(
                    "transition names an undeclared event",
                    row.event,
                ));
            }
            let target = Target::parse(&row.next);
            if let Target::State(next) = &target {
                if !actions.contains_key(next) {
                    return Err(CoreError::validation(
                        "transition targets an undeclared state",
                        next.clone(),
                    ));
                }
            }
            transitions.insert(row.state, row.event, target)?;
        }

        Ok(Self {
            name: name.unwrap_or_else(|| "mission".to_string()),
            actions,
            events,
            transitions,
            start_state: start,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_state(&self) -> &str {
        &self.start_state
    }

    pub fn action(&self, state: &str) -> Option<&ActionSpec> {
        self.actions.get(state)
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionSpec> {
        self.actions.values()
    }

    pub fn event_tree(&self, event: &str) -> Option<&EventTree> {
        self.events.get(event)
    }

    pub fn events(&self) -> impl Iterator<Item = &EventTree> {
        self.events.values()
    }

    pub fn transitions(&self) -> &TransitionTable {
        &self.transitions
    }

    /// Declared event ids that interrupt `state`, ordered by id.
    ///
    /// The implicit `done`/`error` rows are excluded: they are raised by the
    /// action itself, not by a watcher.
    pub fn watched_events(&self, state: &str) -> Vec<&str> {
        self.transitions
            .events_for(state)
            .into_iter()
            .filter(|e| *e != DONE_EVENT && *e != ERROR_EVENT)
            .collect()
    }

    pub fn lookup(&self, state: &str, event: &str) -> Option<&Target> {
        self.transitions.lookup(state, event)
    }

    /// State ids in declaration-independent (sorted) order.
    pub fn state_ids(&self) -> BTreeSet<&str> {
        self.actions.keys().map(String::as_str).collect()
    }
}

fn check_declared_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(CoreError::validation("ids must not be empty", id));
    }
    if id == DONE_EVENT || id == ERROR_EVENT || id == TERMINATE {
        return Err(CoreError::validation("id is reserved", id));
    }
    Ok(())
}

/// Programmatic construction of a [`MissionDoc`], validated on `build()`.
#[derive(Debug, Clone, Default)]
pub struct MissionBuilder {
    name: Option<String>,
    start: Option<String>,
    actions: Vec<ActionSpec>,
    events: Vec<EventSpec>,
    transitions: Vec<TransitionRow>,
}

impl MissionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare an action. The first declared action is the start state unless
    /// `start()` says otherwise.
    pub fn action(mut self, id: impl Into<String>, kind: ActionKind) -> Self {
        self.actions.push(ActionSpec {
            id: id.into(),
            kind,
        });
        self
    }

    pub fn event(mut self, id: impl Into<String>, kind: EventKind) -> Self {
        self.events.push(EventSpec {
            id: id.into(),
            kind,
        });
        self
    }

    pub fn transition(
        mut self,
        state: impl Into<String>,
        event: impl Into<String>,
        next: impl Into<String>,
    ) -> Self {
        self.transitions.push(TransitionRow {
            state: state.into(),
            event: event.into(),
            next: next.into(),
        });
        self
    }

    pub fn start(mut self, id: impl Into<String>) -> Self {
        self.start = Some(id.into());
        self
    }

    pub fn into_doc(self) -> MissionDoc {
        let start = self
            .start
            .or_else(|| self.actions.first().map(|a| a.id.clone()))
            .unwrap_or_default();
        MissionDoc {
            name: self.name,
            start,
            actions: self.actions,
            events: self.events,
            transitions: self.transitions,
        }
    }

    pub fn build(self) -> Result<MissionDefinition> {
        MissionDefinition::from_doc(self.into_doc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn base() -> MissionBuilder {
        MissionBuilder::new()
            .action("detect", ActionKind::Idle)
            .action("track", ActionKind::Hover { seconds: None })
            .event(
                "person_detected",
                EventKind::ObjectDetected {
                    source: "cam".into(),
                    class: "person".into(),
                    min_confidence: 0.5,
                },
            )
            .event("lost", EventKind::Not { reference: "person_detected".into() })
    }

    #[test]
    fn valid_mission_builds() {
        let def = base()
            .transition("detect", "person_detected", "track")
            .transition("track", "lost", "detect")
            .transition("track", "done", "TERMINATE")
            .build()
            .unwrap();

        assert_eq!(def.start_state(), "detect");
        assert_eq!(def.watched_events("track"), vec!["lost"]);
        assert_eq!(def.lookup("track", "done"), Some(&Target::Terminate));
        assert!(matches!(def.event_tree("lost"), Some(EventTree::Not { .. })));
        assert_eq!(def.name(), "mission");
    }

    #[test]
    fn unknown_start_is_rejected() {
        let e = base().start("nowhere").build().unwrap_err();
        assert_eq!(e.kind, ErrorKind::ValidationFailed);
    }

    #[test]
    fn undeclared_event_in_transition_is_rejected() {
        let e = base()
            .transition("detect", "ghost", "track")
            .build()
            .unwrap_err();
        assert!(e.message.contains("undeclared event"));
    }

    #[test]
    fn undeclared_target_is_rejected() {
        let e = base()
            .transition("detect", "person_detected", "land")
            .build()
            .unwrap_err();
        assert!(e.message.contains("undeclared state"));
    }

    #[test]
    fn reserved_ids_are_rejected() {
        let e = MissionBuilder::new()
            .action("done", ActionKind::Idle)
            .build()
            .unwrap_err();
        assert!(e.message.contains("reserved"));

        let e = base().event("TERMINATE", EventKind::External).build().unwrap_err();
        assert!(e.message.contains("reserved"));
    }

    #[test]
    fn event_and_action_ids_must_not_collide() {
        let e = base().event("track", EventKind::External).build().unwrap_err();
        assert!(e.message.contains("collides"));
    }

    #[test]
    fn duplicate_transition_rows_are_rejected() {
        let e = base()
            .transition("detect", "done", "track")
            .transition("detect", "done", "TERMINATE")
            .build()
            .unwrap_err();
        assert_eq!(e.transition_context(), Some(("detect", "done")));
    }
}
