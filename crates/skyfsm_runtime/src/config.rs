use std::env;
use std::time::Duration;

use skyfsm_core::error::{CoreError, Domain, ErrorKind, Payload, Result};

pub const DEFAULT_POLL_MS: u64 = 50;
pub const DEFAULT_TEARDOWN_GRACE_MS: u64 = 2_000;
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

pub const ENV_POLL_MS: &str = "SKYFSM_POLL_MS";
pub const ENV_TEARDOWN_GRACE_MS: &str = "SKYFSM_TEARDOWN_GRACE_MS";
pub const ENV_FAILSAFE: &str = "SKYFSM_FAILSAFE";

/// Recovery command sent to the vehicle when the scheduler hits a fatal condition.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum FailsafeKind {
    #[default]
    Hover,
    ReturnToHome,
    Land,
}

impl FailsafeKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hover" => Some(FailsafeKind::Hover),
            "return_home" | "return_to_home" | "rth" => Some(FailsafeKind::ReturnToHome),
            "land" => Some(FailsafeKind::Land),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            FailsafeKind::Hover => "hover",
            FailsafeKind::ReturnToHome => "return_home",
            FailsafeKind::Land => "land",
        }
    }
}

/// Scheduler tuning. No field here introduces a mission-level timeout:
/// those are always modeled as timer events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Period at which watchers re-check their event and looping actions tick.
    pub poll_interval: Duration,
    /// How long teardown waits for a cancelled action/watcher to acknowledge.
    pub teardown_grace: Duration,
    pub failsafe: FailsafeKind,
    /// Capacity of the mission-event broadcast channel.
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            teardown_grace: Duration::from_millis(DEFAULT_TEARDOWN_GRACE_MS),
            failsafe: FailsafeKind::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `SKYFSM_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_POLL_MS) {
            config.poll_interval = Duration::from_millis(parse_ms(ENV_POLL_MS, &value)?);
        }
        if let Some(value) = lookup(ENV_TEARDOWN_GRACE_MS) {
            config.teardown_grace =
                Duration::from_millis(parse_ms(ENV_TEARDOWN_GRACE_MS, &value)?);
        }
        if let Some(value) = lookup(ENV_FAILSAFE) {
            config.failsafe = FailsafeKind::parse(&value).ok_or_else(|| {
                config_error(ENV_FAILSAFE, &value, "expected hover, return_home or land")
            })?;
        }

        Ok(config)
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll_interval = poll;
        self
    }

    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }

    pub fn with_failsafe(mut self, failsafe: FailsafeKind) -> Self {
        self.failsafe = failsafe;
        self
    }
}

fn parse_ms(key: &'static str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(ms),
        _ => Err(config_error(key, value, "expected a positive number of milliseconds")),
    }
}

fn config_error(key: &'static str, value: &str, expected: &'static str) -> CoreError {
    CoreError::error()
        .domain(Domain::Config)
        .kind(ErrorKind::InvalidArgument)
        .msgf(format_args!("{key}='{value}': {expected}"))
        .payload(Payload::Context {
            key,
            value: value.to_string().into(),
        })
        .build()
}
