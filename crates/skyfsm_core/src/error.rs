use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Convenient result alias for skyfsm_core.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Log/handling importance. Maps onto tracing levels in the runtime.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// Where an error came from (helps triage and routing).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Domain {
    Mission,
    Scheduler,
    Watcher,
    Action,
    Vehicle,
    Compute,
    Config,
    Other,
}

/// Stable error "kind" for matching/branching.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    InvalidArgument,
    InvalidState,
    ValidationFailed,
    Parse,
    ActionExecution,
    TransitionNotFound,
    TeardownTimeout,
    VehicleSurface,
    AlreadyRunning,
    NotRunning,
    Timeout,
    Io,
    Other,
}

impl ErrorKind {
    /// Stable snake_case label used as a structured log field.
    pub const fn label(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::Parse => "parse",
            ErrorKind::ActionExecution => "action_execution",
            ErrorKind::TransitionNotFound => "transition_not_found",
            ErrorKind::TeardownTimeout => "teardown_timeout",
            ErrorKind::VehicleSurface => "vehicle_surface",
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::NotRunning => "not_running",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
            ErrorKind::Other => "other",
        }
    }
}

/// Optional structured payload for rich context.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Payload {
    None,

    /// Generic key/value context (usually no heap alloc if using &str).
    Context {
        key: &'static str,
        value: Cow<'static, str>,
    },

    /// Mission-graph context: the state that was active and the event involved.
    Transition { state: String, event: String },
}

/// The one error type that crosses module boundaries in skyfsm.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
#[error("{severity:?}: {message}")]
pub struct CoreError {
    pub domain: Domain,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: Cow<'static, str>,
    pub payload: Payload,
}

impl CoreError {
    /// Fully-specified constructor (rarely needed at call sites).
    pub fn new(
        domain: Domain,
        kind: ErrorKind,
        severity: Severity,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            domain,
            kind,
            severity,
            message: message.into(),
            payload: Payload::None,
        }
    }

    // ---------------- Fluent entry points ----------------

    #[inline]
    pub fn trace() -> ErrB {
        ErrB::new(Severity::Trace)
    }
    #[inline]
    pub fn debug() -> ErrB {
        ErrB::new(Severity::Debug)
    }
    #[inline]
    pub fn info() -> ErrB {
        ErrB::new(Severity::Info)
    }
    #[inline]
    pub fn warn() -> ErrB {
        ErrB::new(Severity::Warn)
    }
    #[inline]
    pub fn error() -> ErrB {
        ErrB::new(Severity::Error)
    }
    #[inline]
    pub fn fatal() -> ErrB {
        ErrB::new(Severity::Fatal)
    }

    /// Mission validation failure with the offending id as context.
    pub fn validation(message: impl Into<Cow<'static, str>>, id: impl Into<String>) -> Self {
        CoreError::error()
            .domain(Domain::Mission)
            .kind(ErrorKind::ValidationFailed)
            .msg(message)
            .payload(Payload::Context {
                key: "id",
                value: Cow::Owned(id.into()),
            })
            .build()
    }

    /// A winning event has no row in the transition table for the active state.
    pub fn transition_not_found(state: &str, event: &str) -> Self {
        CoreError::fatal()
            .domain(Domain::Scheduler)
            .kind(ErrorKind::TransitionNotFound)
            .msgf(format_args!("no transition for event '{event}' in state '{state}'"))
            .payload(Payload::Transition {
                state: state.to_string(),
                event: event.to_string(),
            })
            .build()
    }

    /// `(state, event)` pair carried by this error, if any.
    pub fn transition_context(&self) -> Option<(&str, &str)> {
        match &self.payload {
            Payload::Transition { state, event } => Some((state, event)),
            _ => None,
        }
    }
}

/// Fluent builder that behaves like iterator chains (takes self, returns Self).
/// Defaults:
/// - domain = Other
/// - kind = Other
/// - message = ""
/// - payload = None
#[derive(Debug, Clone)]
pub struct ErrB {
    domain: Domain,
    kind: ErrorKind,
    severity: Severity,
    message: Cow<'static, str>,
    payload: Payload,
}

impl ErrB {
    #[inline]
    fn new(severity: Severity) -> Self {
        Self {
            domain: Domain::Other,
            kind: ErrorKind::Other,
            severity,
            message: Cow::Borrowed(""),
            payload: Payload::None,
        }
    }

    // -------- Guided setters --------

    /// Set/override the domain (defaults to Domain::Other).
    #[inline]
    pub fn domain(mut self, d: Domain) -> Self {
        self.domain = d;
        self
    }

    /// Set/override the kind (defaults to ErrorKind::Other).
    #[inline]
    pub fn kind(mut self, k: ErrorKind) -> Self {
        self.kind = k;
        self
    }

    #[inline]
    pub fn msg(mut self, m: impl Into<Cow<'static, str>>) -> Self {
        self.message = m.into();
        self
    }

    /// Formatting-friendly message setter.
    #[inline]
    pub fn msgf(mut self, args: fmt::Arguments<'_>) -> Self {
        self.message = Cow::Owned(args.to_string());
        self
    }

    /// Only one payload: this replaces any previous payload (default is None).
    #[inline]
    pub fn payload(mut self, p: Payload) -> Self {
        self.payload = p;
        self
    }

    /// Shorthand for a `Payload::Transition`.
    #[inline]
    pub fn at(self, state: impl Into<String>, event: impl Into<String>) -> Self {
        self.payload(Payload::Transition {
            state: state.into(),
            event: event.into(),
        })
    }

    #[inline]
    pub fn build(self) -> CoreError {
        CoreError {
            domain: self.domain,
            kind: self.kind,
            severity: self.severity,
            message: self.message,
            payload: self.payload,
        }
    }
}

impl From<ErrB> for CoreError {
    fn from(b: ErrB) -> Self {
        b.build()
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::error()
            .domain(Domain::Other)
            .kind(ErrorKind::Io)
            .msg("io error")
            .payload(Payload::Context {
                key: "io",
                value: e.to_string().into(),
            })
            .build()
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(e: serde_yaml::Error) -> Self {
        CoreError::error()
            .domain(Domain::Mission)
            .kind(ErrorKind::Parse)
            .msgf(format_args!("mission document is not valid YAML: {e}"))
            .build()
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::error()
            .domain(Domain::Mission)
            .kind(ErrorKind::Parse)
            .msgf(format_args!("mission document is not valid JSON: {e}"))
            .build()
    }
}
