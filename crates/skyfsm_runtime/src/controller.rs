//! Mission controller: the entry point that starts, stops and feeds one
//! mission at a time.

use std::sync::{Arc, Mutex, MutexGuard};

use skyfsm_core::error::{CoreError, Domain, ErrorKind, Result};
use skyfsm_core::mission::MissionDefinition;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::action::{ActionFactory, BuiltinActions};
use crate::compute::ResultStore;
use crate::config::RuntimeConfig;
use crate::scheduler::{MissionEvent, MissionOutcome, Scheduler};
use crate::trigger::TriggerHub;
use crate::vehicle::VehicleSurface;

struct RunningMission {
    name: String,
    mission: Arc<MissionDefinition>,
    cancel: CancellationToken,
    hub: TriggerHub,
    finished: watch::Receiver<bool>,
    join: JoinHandle<Result<MissionOutcome>>,
}

/// Owns at most one running scheduler.
///
/// `stop` and `wait` block until every action and watcher of the mission has
/// acknowledged cancellation (or was detached after the teardown grace).
pub struct MissionController {
    vehicle: Arc<dyn VehicleSurface>,
    compute: Arc<dyn ResultStore>,
    actions: Arc<dyn ActionFactory>,
    config: RuntimeConfig,
    events: broadcast::Sender<MissionEvent>,
    running: Mutex<Option<RunningMission>>,
}

impl MissionController {
    pub fn new(vehicle: Arc<dyn VehicleSurface>, compute: Arc<dyn ResultStore>) -> Self {
        Self::with_config(vehicle, compute, RuntimeConfig::default())
    }

    pub fn with_config(
        vehicle: Arc<dyn VehicleSurface>,
        compute: Arc<dyn ResultStore>,
        config: RuntimeConfig,
    ) -> Self {
        let (events, _rx) = broadcast::channel(config.event_capacity);
        Self {
            vehicle,
            compute,
            actions: Arc::new(BuiltinActions),
            config,
            events,
            running: Mutex::new(None),
        }
    }

    pub fn with_actions(mut self, actions: Arc<dyn ActionFactory>) -> Self {
        self.actions = actions;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Mission events of every run started by this controller.
    pub fn subscribe(&self) -> broadcast::Receiver<MissionEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Option<RunningMission>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        }
    }

    /// Spawn a scheduler for `mission` on the current Tokio runtime.
    ///
    /// Fails with `AlreadyRunning` while a previous mission is still active.
    /// The result of a previous mission that finished but was never
    /// collected with `stop`/`wait` is discarded.
    pub fn start(&self, mission: MissionDefinition) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            CoreError::error()
                .domain(Domain::Mission)
                .kind(ErrorKind::InvalidState)
                .msgf(format_args!("no tokio runtime to run the mission on: {e}"))
                .build()
        })?;

        let mut running = self.lock();
        if let Some(current) = running.as_ref() {
            if !current.join.is_finished() {
                return Err(CoreError::warn()
                    .domain(Domain::Mission)
                    .kind(ErrorKind::AlreadyRunning)
                    .msgf(format_args!("mission '{}' is already running", current.name))
                    .build());
            }
        }

        let mission = Arc::new(mission);
        let scheduler = Scheduler::new(
            Arc::clone(&mission),
            Arc::clone(&self.vehicle),
            Arc::clone(&self.compute),
        )
        .with_config(self.config.clone())
        .with_actions(Arc::clone(&self.actions))
        .with_event_sender(self.events.clone());

        let hub = scheduler.notifier();
        let cancel = CancellationToken::new();
        let (done, finished) = watch::channel(false);
        let run = scheduler.run(cancel.clone());
        let join = runtime.spawn(async move {
            let outcome = run.await;
            let _ = done.send(true);
            outcome
        });

        let name = mission.name().to_string();
        info!(mission = %name, "mission start requested");
        *running = Some(RunningMission {
            name,
            mission,
            cancel,
            hub,
            finished,
            join,
        });
        Ok(())
    }

    /// True while a started mission has not yet finished.
    pub fn is_running(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|current| !current.join.is_finished())
    }

    /// Cancel the running mission and wait for it to wind down.
    ///
    /// If the mission already finished on its own, its outcome is returned.
    pub async fn stop(&self) -> Result<MissionOutcome> {
        let current = self.take()?;
        info!(mission = %current.name, "mission stop requested");
        current.cancel.cancel();
        collect(current).await
    }

    /// Wait for the running mission to finish on its own.
    ///
    /// Dropping the returned future leaves the mission running and still
    /// stoppable.
    pub async fn wait(&self) -> Result<MissionOutcome> {
        let mut finished = self
            .lock()
            .as_ref()
            .map(|current| current.finished.clone())
            .ok_or_else(not_running)?;
        // Err: the scheduler task is gone without reporting; collect says why.
        let _ = finished.wait_for(|done| *done).await;
        collect(self.take()?).await
    }

    /// Raise `event` in the running mission's current state, as if a
    /// watcher had triggered it. The event must be declared by the mission.
    pub fn notify(&self, event: &str) -> Result<()> {
        let running = self.lock();
        let current = match running.as_ref() {
            Some(current) if !current.join.is_finished() => current,
            _ => return Err(not_running()),
        };

        if current.mission.event_tree(event).is_none() {
            return Err(CoreError::warn()
                .domain(Domain::Mission)
                .kind(ErrorKind::InvalidArgument)
                .msgf(format_args!(
                    "event '{event}' is not declared by mission '{}'",
                    current.name
                ))
                .build());
        }

        debug!(mission = %current.name, event, "external notify");
        if current.hub.notify(event) {
            Ok(())
        } else {
            Err(not_running())
        }
    }

    fn take(&self) -> Result<RunningMission> {
        self.lock().take().ok_or_else(not_running)
    }
}

async fn collect(current: RunningMission) -> Result<MissionOutcome> {
    match current.join.await {
        Ok(outcome) => outcome,
        Err(join_err) => Err(CoreError::fatal()
            .domain(Domain::Scheduler)
            .kind(ErrorKind::Other)
            .msgf(format_args!("scheduler task of '{}' failed: {join_err}", current.name))
            .build()),
    }
}

fn not_running() -> CoreError {
    CoreError::warn()
        .domain(Domain::Mission)
        .kind(ErrorKind::NotRunning)
        .msg("no mission is running")
        .build()
}
