//! skyfsm_runtime
//!
//! Async runtime for mission graphs built by `skyfsm_core`.
//! Runs one action and one watcher per outgoing event for the active state,
//! races them on a single trigger channel, tears the losers down with
//! cooperative cancellation and advances until `TERMINATE` or a fatal error.

pub mod action;
pub mod compute;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod scheduler;
pub mod trigger;
pub mod vehicle;
pub mod watcher;

pub use action::{Action, ActionContext, ActionFactory, BuiltinActions};
pub use compute::{ComputeResult, Detection, MemoryResultStore, ResultStore};
pub use config::{FailsafeKind, RuntimeConfig};
pub use controller::MissionController;
pub use event::{Event, EventContext};
pub use scheduler::{MissionEvent, MissionOutcome, MissionStatus, Scheduler};
pub use trigger::{Trigger, TriggerHub, TriggerSource};
pub use vehicle::{SimVehicle, VehicleCommand, VehicleError, VehicleSurface};

pub use skyfsm_core::error::{CoreError, Result};
