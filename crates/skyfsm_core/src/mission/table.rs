use std::collections::BTreeMap;

use crate::error::{CoreError, Domain, ErrorKind, Result};

use super::Target;

/// Immutable `(state, event) -> target` mapping.
///
/// Backed by a `BTreeMap` so that iteration (and therefore watcher spawn
/// order and graph output) is deterministic.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TransitionTable {
    rows: BTreeMap<(String, String), Target>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row. Declaring the same `(state, event)` pair twice is an error.
    pub fn insert(
        &mut self,
        state: impl Into<String>,
        event: impl Into<String>,
        target: Target,
    ) -> Result<()> {
        let key = (state.into(), event.into());
        if self.rows.contains_key(&key) {
            return Err(CoreError::error()
                .domain(Domain::Mission)
                .kind(ErrorKind::ValidationFailed)
                .msg("duplicate transition row")
                .at(key.0, key.1)
                .build());
        }
        self.rows.insert(key, target);
        Ok(())
    }

    pub fn lookup(&self, state: &str, event: &str) -> Option<&Target> {
        self.rows_for(state)
            .find(|(e, _)| *e == event)
            .map(|(_, target)| target)
    }

    /// Rows for one state, ordered by event id.
    pub fn rows_for(&self, state: &str) -> impl Iterator<Item = (&str, &Target)> + '_ {
        let state = state.to_string();
        self.rows
            .range((state.clone(), String::new())..)
            .take_while(move |((s, _), _)| *s == state)
            .map(|((_, e), t)| (e.as_str(), t))
    }

    /// Event ids with a row for `state`, ordered by id.
    pub fn events_for(&self, state: &str) -> Vec<&str> {
        self.rows_for(state).map(|(e, _)| e).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Target)> {
        self.rows
            .iter()
            .map(|((s, e), t)| (s.as_str(), e.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
