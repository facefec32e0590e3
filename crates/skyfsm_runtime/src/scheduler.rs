//! Mission scheduler.
//!
//! For every state visit the scheduler:
//! 1. opens a new trigger epoch and publishes `StateEntered`,
//! 2. instantiates a watcher per `(state, event)` row and a fresh action,
//! 3. races them on the trigger channel until one event has a transition,
//! 4. cancels and joins everything spawned for the state (bounded by the
//!    teardown grace), clears the active set and drains stale triggers,
//! 5. advances, terminates, or runs the failsafe once and halts.
//!
//! Nothing spawned for a state outlives step 4 except units that ignored
//! cancellation past the grace period; those are detached and reported as
//! `TeardownDegraded`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use skyfsm_core::error::{CoreError, Domain, ErrorKind, Payload, Result};
use skyfsm_core::mission::{MissionDefinition, Target, ERROR_EVENT};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action::{run_action, ActionContext, ActionFactory, BuiltinActions};
use crate::compute::ResultStore;
use crate::config::{FailsafeKind, RuntimeConfig};
use crate::error::log_core_error;
use crate::event::{self, EventContext};
use crate::trigger::{trigger_channel, Trigger, TriggerHub, TriggerReceiver, TriggerSource};
use crate::vehicle::VehicleSurface;
use crate::watcher::{spawn_watcher, ActiveWatchers, WatcherHandle};

/// Progress reported while a mission runs.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionEvent {
    StateEntered {
        state: String,
        /// 1 on the first visit of `state`, 2 on the second, ...
        visit: u32,
    },
    StateExited {
        state: String,
        /// Watchers that were cancelled without triggering.
        stopped_watchers: usize,
    },
    TransitionTaken {
        from: String,
        event: String,
        source: TriggerSource,
        to: Target,
    },
    /// A cancelled action or watcher did not stop within the grace period
    /// and was detached.
    TeardownDegraded { state: String, unit: String },
    Terminated { states_visited: usize },
    Stopped { state: String },
    Fatal {
        state: String,
        event: Option<String>,
        kind: ErrorKind,
    },
    FailsafeInvoked { kind: FailsafeKind, ok: bool },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MissionStatus {
    /// `TERMINATE` was reached.
    Terminated,
    /// The run was cancelled from outside.
    Stopped,
}

/// How a mission run ended, with every state entered in order
/// (plus `TERMINATE` when reached).
#[derive(Debug, Clone, PartialEq)]
pub struct MissionOutcome {
    pub status: MissionStatus,
    pub visited: Vec<Target>,
}

impl MissionOutcome {
    pub fn terminated(&self) -> bool {
        self.status == MissionStatus::Terminated
    }

    /// Visited state ids, `TERMINATE` included.
    pub fn path(&self) -> Vec<&str> {
        self.visited.iter().map(Target::label).collect()
    }
}

enum Step {
    Next(Target),
    Stopped,
}

enum Race {
    Won(Trigger, Target),
    Unmatched(Trigger),
    Stopped,
}

struct Unit(String);

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct Scheduler {
    mission: Arc<MissionDefinition>,
    vehicle: Arc<dyn VehicleSurface>,
    compute: Arc<dyn ResultStore>,
    actions: Arc<dyn ActionFactory>,
    config: RuntimeConfig,
    hub: TriggerHub,
    triggers: TriggerReceiver,
    events: broadcast::Sender<MissionEvent>,
    active: ActiveWatchers,
}

impl Scheduler {
    pub fn new(
        mission: Arc<MissionDefinition>,
        vehicle: Arc<dyn VehicleSurface>,
        compute: Arc<dyn ResultStore>,
    ) -> Self {
        let config = RuntimeConfig::default();
        let (hub, triggers) = trigger_channel();
        let (events, _rx) = broadcast::channel(config.event_capacity);
        Self {
            mission,
            vehicle,
            compute,
            actions: Arc::new(BuiltinActions),
            config,
            hub,
            triggers,
            events,
            active: ActiveWatchers::new(),
        }
    }

    /// Replace the tuning. Call before `subscribe`: the event channel is
    /// recreated with the configured capacity.
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        let (events, _rx) = broadcast::channel(config.event_capacity);
        self.events = events;
        self.config = config;
        self
    }

    pub fn with_actions(mut self, actions: Arc<dyn ActionFactory>) -> Self {
        self.actions = actions;
        self
    }

    /// Publish mission events on an existing channel.
    pub fn with_event_sender(mut self, events: broadcast::Sender<MissionEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MissionEvent> {
        self.events.subscribe()
    }

    /// Handle for injecting external events into the current state's race.
    pub fn notifier(&self) -> TriggerHub {
        self.hub.clone()
    }

    pub fn active_watchers(&self) -> ActiveWatchers {
        self.active.clone()
    }

    pub fn mission(&self) -> &MissionDefinition {
        &self.mission
    }

    /// Run from the start state until `TERMINATE`, cancellation of `cancel`,
    /// or a fatal condition. On a fatal condition the failsafe runs exactly
    /// once and the error is returned.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<MissionOutcome> {
        let mut current = self.mission.start_state().to_string();
        let mut visited = Vec::new();
        let mut visits: HashMap<String, u32> = HashMap::new();

        info!(mission = self.mission.name(), start = %current, "mission started");

        loop {
            let visit = visits.entry(current.clone()).or_insert(0);
            *visit += 1;
            let visit = *visit;

            let step = self.run_state(&current, visit, &cancel).await;
            visited.push(Target::State(current.clone()));

            match step {
                Ok(Step::Next(Target::Terminate)) => {
                    visited.push(Target::Terminate);
                    info!(mission = self.mission.name(), states = visited.len() - 1, "mission terminated");
                    self.publish(MissionEvent::Terminated {
                        states_visited: visited.len() - 1,
                    });
                    return Ok(MissionOutcome {
                        status: MissionStatus::Terminated,
                        visited,
                    });
                }
                Ok(Step::Next(Target::State(next))) => current = next,
                Ok(Step::Stopped) => {
                    info!(mission = self.mission.name(), state = %current, "mission stopped");
                    self.publish(MissionEvent::Stopped { state: current });
                    return Ok(MissionOutcome {
                        status: MissionStatus::Stopped,
                        visited,
                    });
                }
                Err(err) => {
                    log_core_error(&err);
                    let (state, event) = match err.transition_context() {
                        Some((state, event)) => (state.to_string(), Some(event.to_string())),
                        None => (current.clone(), None),
                    };
                    self.publish(MissionEvent::Fatal {
                        state,
                        event,
                        kind: err.kind,
                    });
                    self.failsafe().await;
                    return Err(err);
                }
            }
        }
    }

    async fn run_state(
        &mut self,
        state: &str,
        visit: u32,
        cancel: &CancellationToken,
    ) -> Result<Step> {
        let epoch = self.triggers.begin_state();
        let entered_at = Instant::now();
        info!(state, visit, "entering state");
        self.publish(MissionEvent::StateEntered {
            state: state.to_string(),
            visit,
        });

        // Resolve everything before spawning so a failure leaves nothing behind.
        let spec = self.mission.action(state).cloned().ok_or_else(|| {
            CoreError::fatal()
                .domain(Domain::Scheduler)
                .kind(ErrorKind::InvalidState)
                .msgf(format_args!("state '{state}' has no action"))
                .payload(Payload::Context {
                    key: "state",
                    value: state.to_string().into(),
                })
                .build()
        })?;
        let mut checkers = Vec::new();
        for event_id in self.mission.watched_events(state) {
            let checker = self
                .mission
                .event_tree(event_id)
                .ok_or_else(|| {
                    CoreError::fatal()
                        .domain(Domain::Scheduler)
                        .kind(ErrorKind::InvalidState)
                        .msgf(format_args!("event '{event_id}' is not declared"))
                        .at(state, event_id)
                        .build()
                })
                .and_then(event::instantiate)
                .map_err(|e| {
                    CoreError::fatal()
                        .domain(Domain::Watcher)
                        .kind(e.kind)
                        .msgf(format_args!("cannot watch '{event_id}': {}", e.message))
                        .at(state, event_id)
                        .build()
                })?;
            checkers.push(checker);
        }

        let state_cancel = cancel.child_token();

        let event_ctx = EventContext::new(state, Arc::clone(&self.compute), entered_at);
        let watchers: Vec<WatcherHandle> = checkers
            .into_iter()
            .map(|checker| {
                spawn_watcher(
                    checker,
                    event_ctx.clone(),
                    self.config.poll_interval,
                    state_cancel.child_token(),
                    self.hub.sender(epoch, TriggerSource::Watcher),
                    self.active.clone(),
                )
            })
            .collect();

        let announcer = self.hub.sender(epoch, TriggerSource::Action);
        let action_task = match self.actions.create(&spec) {
            Ok(action) => {
                let ctx = ActionContext::new(
                    state,
                    state_cancel.child_token(),
                    Arc::clone(&self.vehicle),
                    Arc::clone(&self.compute),
                    self.config.poll_interval,
                    announcer,
                );
                Some(tokio::spawn(run_action(action, ctx)))
            }
            Err(err) => {
                log_core_error(&err);
                announcer.fail(err);
                None
            }
        };
        debug!(state, watchers = watchers.len(), "racing");

        let race = loop {
            let trigger = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Race::Stopped,
                trigger = self.triggers.recv() => trigger,
            };
            let Some(trigger) = trigger else {
                break Race::Stopped;
            };
            match self.mission.lookup(state, &trigger.event) {
                Some(next) => break Race::Won(trigger, next.clone()),
                None if trigger.source == TriggerSource::External => {
                    warn!(state, event = %trigger.event, "no transition for external event, ignored");
                }
                None => break Race::Unmatched(trigger),
            }
        };

        state_cancel.cancel();
        let stopped_watchers = self.teardown(state, action_task, watchers).await;
        self.triggers.drain();
        debug!(state, stopped_watchers, "state exited");
        self.publish(MissionEvent::StateExited {
            state: state.to_string(),
            stopped_watchers,
        });

        match race {
            Race::Won(trigger, next) => {
                info!(
                    from = state,
                    event = %trigger.event,
                    source = ?trigger.source,
                    to = %next,
                    "transition"
                );
                self.publish(MissionEvent::TransitionTaken {
                    from: state.to_string(),
                    event: trigger.event,
                    source: trigger.source,
                    to: next.clone(),
                });
                Ok(Step::Next(next))
            }
            Race::Stopped => Ok(Step::Stopped),
            Race::Unmatched(trigger) => Err(match trigger.error {
                Some(cause) => CoreError::fatal()
                    .domain(Domain::Scheduler)
                    .kind(ErrorKind::TransitionNotFound)
                    .msgf(format_args!(
                        "action in state '{state}' failed with no error transition: {}",
                        cause.message
                    ))
                    .at(state, ERROR_EVENT)
                    .build(),
                None => CoreError::transition_not_found(state, &trigger.event),
            }),
        }
    }

    /// Join the action and every watcher of `state`, each bounded by the
    /// grace period. Returns how many watchers were stopped rather than
    /// triggered.
    async fn teardown(
        &self,
        state: &str,
        action: Option<JoinHandle<()>>,
        watchers: Vec<WatcherHandle>,
    ) -> usize {
        let grace = self.config.teardown_grace;

        let action_join = async {
            match action {
                Some(handle) => join_unit(Unit(format!("action:{state}")), handle, grace).await,
                None => None,
            }
        };
        let watcher_joins = join_all(watchers.into_iter().map(|w| {
            let unit = Unit(format!("watcher:{}", w.event_id()));
            join_unit(unit, w.into_join(), grace)
        }));
        let (action_degraded, watchers_degraded) = tokio::join!(action_join, watcher_joins);

        for unit in action_degraded
            .into_iter()
            .chain(watchers_degraded.into_iter().flatten())
        {
            let err = CoreError::warn()
                .domain(Domain::Scheduler)
                .kind(ErrorKind::TeardownTimeout)
                .msgf(format_args!("{unit} did not stop within {grace:?}, detached"))
                .payload(Payload::Context {
                    key: "state",
                    value: state.to_string().into(),
                })
                .build();
            log_core_error(&err);
            self.publish(MissionEvent::TeardownDegraded {
                state: state.to_string(),
                unit: unit.0,
            });
        }

        self.active.clear()
    }

    async fn failsafe(&self) {
        let kind = self.config.failsafe;
        warn!(failsafe = kind.label(), "invoking failsafe");
        let result = match kind {
            FailsafeKind::Hover => self.vehicle.hover().await,
            FailsafeKind::ReturnToHome => self.vehicle.return_to_home().await,
            FailsafeKind::Land => self.vehicle.land().await,
        };
        let ok = match result {
            Ok(()) => true,
            Err(e) => {
                log_core_error(&CoreError::from(e));
                false
            }
        };
        self.publish(MissionEvent::FailsafeInvoked { kind, ok });
    }

    fn publish(&self, event: MissionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Wait for a cancelled unit. Returns the unit back if it outlived `grace`;
/// its handle is dropped, which detaches the task without aborting it.
async fn join_unit<T>(unit: Unit, handle: JoinHandle<T>, grace: Duration) -> Option<Unit> {
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(_)) => None,
        Ok(Err(join_err)) => {
            warn!(unit = %unit, "task ended abnormally: {join_err}");
            None
        }
        Err(_) => Some(unit),
    }
}
