//! Actions: the behavior running while a mission state is active.
//!
//! The scheduler owns exactly one action instance per state visit. It is
//! created fresh on entry, driven by [`run_action`] on its own task and
//! dropped on exit, so any private state (PID accumulators, loop counters)
//! never survives into a later visit of the same state.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use skyfsm_core::error::{CoreError, Domain, ErrorKind, Result};
use skyfsm_core::mission::ActionSpec;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::compute::ResultStore;
use crate::error::log_core_error;
use crate::trigger::TriggerSender;
use crate::vehicle::VehicleSurface;

pub mod builtin;
pub mod pid;

pub use builtin::{
    ElevateAction, HoverAction, IdleAction, LandAction, PatrolAction, ReturnHomeAction,
    TakeOffAction, TrackAction,
};
pub use pid::Pid;

/// Everything an action may touch while it runs.
#[derive(Clone)]
pub struct ActionContext {
    state: String,
    cancel: CancellationToken,
    vehicle: Arc<dyn VehicleSurface>,
    compute: Arc<dyn ResultStore>,
    tick: Duration,
    announcer: TriggerSender,
}

impl ActionContext {
    pub fn new(
        state: impl Into<String>,
        cancel: CancellationToken,
        vehicle: Arc<dyn VehicleSurface>,
        compute: Arc<dyn ResultStore>,
        tick: Duration,
        announcer: TriggerSender,
    ) -> Self {
        Self {
            state: state.into(),
            cancel,
            vehicle,
            compute,
            tick,
            announcer,
        }
    }

    /// Id of the state this action is bound to.
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn vehicle(&self) -> &dyn VehicleSurface {
        self.vehicle.as_ref()
    }

    pub fn compute(&self) -> &dyn ResultStore {
        self.compute.as_ref()
    }

    /// Control-loop period for actions that tick.
    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Raise a named event into the current state's race.
    pub fn announce(&self, event: &str) -> bool {
        debug!(state = %self.state, event, "action announced event");
        self.announcer.announce(event)
    }

    /// Await `fut` unless the action is cancelled first.
    ///
    /// Returns `None` on cancellation; `fut` is dropped at that point.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// Sleep for `duration`. Returns false if cancelled first.
    ///
    /// A zero duration still yields to the runtime.
    pub async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            tokio::task::yield_now().await;
            return !self.is_cancelled();
        }
        self.guard(tokio::time::sleep(duration)).await.is_some()
    }

    /// Resolve when the action is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// A unit of behavior bound to one mission state.
///
/// `execute` returns `Ok(())` on natural completion (the scheduler then sees
/// `done`) and `Err` on failure (`error`). When the context is cancelled it
/// must return promptly; its result is ignored after cancellation.
#[async_trait]
pub trait Action: Send {
    fn kind(&self) -> &'static str;

    async fn execute(&mut self, ctx: &ActionContext) -> Result<()>;
}

/// Creates a fresh action for each state visit.
pub trait ActionFactory: Send + Sync {
    fn create(&self, spec: &ActionSpec) -> Result<Box<dyn Action>>;
}

/// Factory for the built-in action kinds.
#[derive(Debug, Default, Copy, Clone)]
pub struct BuiltinActions;

impl ActionFactory for BuiltinActions {
    fn create(&self, spec: &ActionSpec) -> Result<Box<dyn Action>> {
        builtin::instantiate(&spec.id, &spec.kind)
    }
}

/// Drive one action to completion and report the outcome on the trigger
/// channel. Nothing is reported once the context has been cancelled.
///
/// A panic inside `execute` is reported as an `error` like any failure.
pub async fn run_action(mut action: Box<dyn Action>, ctx: ActionContext) {
    let kind = action.kind();
    debug!(state = %ctx.state, kind, "action started");

    let result = match AssertUnwindSafe(action.execute(&ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(CoreError::error()
            .domain(Domain::Action)
            .kind(ErrorKind::ActionExecution)
            .msgf(format_args!(
                "{kind} action in state '{}' panicked: {}",
                ctx.state,
                panic_message(panic.as_ref())
            ))
            .build()),
    };
    drop(action);

    if ctx.is_cancelled() {
        debug!(state = %ctx.state, kind, "action cancelled");
        return;
    }

    match result {
        Ok(()) => {
            debug!(state = %ctx.state, kind, "action completed");
            ctx.announcer.done();
        }
        Err(err) => {
            log_core_error(&err);
            ctx.announcer.fail(err);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
