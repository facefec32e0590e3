/// Reserved id of the terminal pseudo-state.
pub const TERMINATE: &str = "TERMINATE";

/// Where a transition leads: another declared state, or mission termination.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Target {
    State(String),
    Terminate,
}

impl Target {
    /// Parse a transition-table target id. `TERMINATE` is the only reserved name.
    pub fn parse(id: &str) -> Self {
        if id == TERMINATE {
            Target::Terminate
        } else {
            Target::State(id.to_string())
        }
    }

    /// Stable, human-readable label (the id as written in the mission document).
    pub fn label(&self) -> &str {
        match self {
            Target::State(id) => id,
            Target::Terminate => TERMINATE,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Target::Terminate)
    }

    /// The state id, if this target is not terminal.
    pub fn state(&self) -> Option<&str> {
        match self {
            Target::State(id) => Some(id),
            Target::Terminate => None,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
