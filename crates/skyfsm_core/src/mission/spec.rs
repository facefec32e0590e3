//! Typed configuration for every action and event kind.
//!
//! Each kind is one variant with its own statically typed fields; the
//! document layer (`serde`) rejects unknown kinds and missing fields, and
//! `validate()` checks value ranges that serde cannot express.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// A WGS84 position with altitude above takeoff, in meters.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

/// PID gains for velocity-controlled tracking.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 0.8,
            ki: 0.05,
            kd: 0.1,
        }
    }
}

fn default_speed() -> f64 {
    3.0
}

fn default_confidence() -> f64 {
    0.5
}

/// A declared action: the behavior bound to one mission state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub id: String,
    #[serde(flatten)]
    pub kind: ActionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    TakeOff {
        altitude: f64,
    },
    Land,
    /// Hold position; completes after `seconds`, or never when unset.
    Hover {
        #[serde(default)]
        seconds: Option<f64>,
    },
    ReturnHome,
    /// Visit `waypoints` in order. `loops = None` patrols until interrupted.
    Patrol {
        waypoints: Vec<GeoPoint>,
        #[serde(default)]
        dwell_seconds: f64,
        #[serde(default)]
        loops: Option<u32>,
    },
    /// Center the vehicle on the best `class` detection published under `source`.
    Track {
        source: String,
        class: String,
        #[serde(default)]
        gain: PidGains,
        #[serde(default = "default_speed")]
        max_speed: f64,
        /// Announce `timeout` when the target has not been seen for this long.
        #[serde(default)]
        lost_timeout_seconds: Option<f64>,
    },
    /// Climb (or descend, when negative) by `climb` meters at `speed` m/s.
    Elevate {
        climb: f64,
        #[serde(default = "default_speed")]
        speed: f64,
    },
    /// Do nothing until interrupted.
    Idle,
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::TakeOff { .. } => "take_off",
            ActionKind::Land => "land",
            ActionKind::Hover { .. } => "hover",
            ActionKind::ReturnHome => "return_home",
            ActionKind::Patrol { .. } => "patrol",
            ActionKind::Track { .. } => "track",
            ActionKind::Elevate { .. } => "elevate",
            ActionKind::Idle => "idle",
        }
    }

    pub fn validate(&self, id: &str) -> Result<()> {
        match self {
            ActionKind::TakeOff { altitude } => positive("take_off altitude", *altitude, id),
            ActionKind::Hover { seconds: Some(s) } => duration("hover seconds", *s, id).map(drop),
            ActionKind::Patrol {
                waypoints,
                dwell_seconds,
                loops,
            } => {
                if waypoints.is_empty() {
                    return Err(CoreError::validation("patrol needs at least one waypoint", id));
                }
                if *loops == Some(0) {
                    return Err(CoreError::validation("patrol loops must be at least 1", id));
                }
                duration("patrol dwell_seconds", *dwell_seconds, id).map(drop)
            }
            ActionKind::Track {
                source,
                class,
                gain,
                max_speed,
                lost_timeout_seconds,
            } => {
                non_empty("track source", source, id)?;
                non_empty("track class", class, id)?;
                non_negative("track gain kp", gain.kp, id)?;
                non_negative("track gain ki", gain.ki, id)?;
                non_negative("track gain kd", gain.kd, id)?;
                positive("track max_speed", *max_speed, id)?;
                match lost_timeout_seconds {
                    Some(s) => {
                        positive("track lost_timeout_seconds", *s, id)?;
                        duration("track lost_timeout_seconds", *s, id).map(drop)
                    }
                    None => Ok(()),
                }
            }
            ActionKind::Elevate { climb, speed } => {
                if !climb.is_finite() {
                    return Err(CoreError::validation("elevate climb must be finite", id));
                }
                positive("elevate speed", *speed, id)?;
                duration("elevate climb / speed", climb.abs() / speed, id).map(drop)
            }
            ActionKind::Hover { seconds: None }
            | ActionKind::Land
            | ActionKind::ReturnHome
            | ActionKind::Idle => Ok(()),
        }
    }
}

/// A declared event: a leaf condition or a combinator over other events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// True once `seconds` have elapsed since the owning state was entered.
    Timer { seconds: f64 },
    /// True while `source` holds a `class` detection at or above `min_confidence`.
    ObjectDetected {
        source: String,
        class: String,
        #[serde(default = "default_confidence")]
        min_confidence: f64,
    },
    /// True once no qualifying detection has been seen for `grace_seconds`.
    ObjectLost {
        source: String,
        class: String,
        #[serde(default = "default_confidence")]
        min_confidence: f64,
        #[serde(default)]
        grace_seconds: f64,
    },
    /// True when `source` has published nothing for `stale_seconds`.
    SignalLost { source: String, stale_seconds: f64 },
    /// Never fires on its own; raised through the mission controller's `notify`.
    External,
    /// All referenced events satisfied at the same evaluation.
    And { refs: Vec<String> },
    /// The referenced event is unsatisfied at evaluation time.
    Not {
        #[serde(rename = "ref")]
        reference: String,
    },
}

impl EventKind {
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Timer { .. } => "timer",
            EventKind::ObjectDetected { .. } => "object_detected",
            EventKind::ObjectLost { .. } => "object_lost",
            EventKind::SignalLost { .. } => "signal_lost",
            EventKind::External => "external",
            EventKind::And { .. } => "and",
            EventKind::Not { .. } => "not",
        }
    }

    /// Ids of the events this kind refers to (empty for leaves).
    pub fn references(&self) -> Vec<&str> {
        match self {
            EventKind::And { refs } => refs.iter().map(String::as_str).collect(),
            EventKind::Not { reference } => vec![reference.as_str()],
            _ => Vec::new(),
        }
    }

    pub fn validate(&self, id: &str) -> Result<()> {
        match self {
            EventKind::Timer { seconds } => duration("timer seconds", *seconds, id).map(drop),
            EventKind::ObjectDetected {
                source,
                class,
                min_confidence,
            } => {
                non_empty("object_detected source", source, id)?;
                non_empty("object_detected class", class, id)?;
                confidence(*min_confidence, id)
            }
            EventKind::ObjectLost {
                source,
                class,
                min_confidence,
                grace_seconds,
            } => {
                non_empty("object_lost source", source, id)?;
                non_empty("object_lost class", class, id)?;
                confidence(*min_confidence, id)?;
                duration("object_lost grace_seconds", *grace_seconds, id).map(drop)
            }
            EventKind::SignalLost {
                source,
                stale_seconds,
            } => {
                non_empty("signal_lost source", source, id)?;
                positive("signal_lost stale_seconds", *stale_seconds, id)?;
                duration("signal_lost stale_seconds", *stale_seconds, id).map(drop)
            }
            EventKind::And { refs } if refs.is_empty() => Err(CoreError::validation(
                "and-event needs at least one reference",
                id,
            )),
            EventKind::And { .. } | EventKind::Not { .. } | EventKind::External => Ok(()),
        }
    }
}

fn positive(what: &'static str, v: f64, id: &str) -> Result<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(CoreError::validation(format!("{what} must be > 0 (got {v})"), id))
    }
}

/// Convert a seconds field into a `Duration`, rejecting negative, non-finite
/// or unrepresentable values.
pub fn duration(what: &'static str, seconds: f64, id: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds).map_err(|e| {
        CoreError::validation(format!("{what} is not a usable duration (got {seconds}): {e}"), id)
    })
}

fn non_negative(what: &'static str, v: f64, id: &str) -> Result<()> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(CoreError::validation(format!("{what} must be >= 0 (got {v})"), id))
    }
}

fn non_empty(what: &'static str, v: &str, id: &str) -> Result<()> {
    if v.trim().is_empty() {
        Err(CoreError::validation(format!("{what} must not be empty"), id))
    } else {
        Ok(())
    }
}

fn confidence(v: f64, id: &str) -> Result<()> {
    if (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(CoreError::validation(
            format!("min_confidence must be within [0, 1] (got {v})"),
            id,
        ))
    }
}
