use std::sync::Arc;

use anyhow::{Context, Result};
use skyfsm_runtime::compute::MemoryResultStore;
use skyfsm_runtime::controller::MissionController;
use skyfsm_runtime::scheduler::MissionEvent;
use skyfsm_runtime::vehicle::SimVehicle;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use skyfsm_runner::config::Config;
use skyfsm_runner::sighting::replay;
use skyfsm_runner::{load_mission, report_graph};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_args()?;
    let mission = load_mission(&config.mission)?;
    report_graph(&mission);

    if config.check_only {
        info!(mission = mission.name(), "mission document is valid");
        return Ok(());
    }

    let vehicle = Arc::new(SimVehicle::new(config.sim_latency));
    let store = Arc::new(MemoryResultStore::new());
    for sighting in config.sightings.iter().cloned() {
        tokio::spawn(replay(Arc::clone(&store), sighting, config.runtime.poll_interval));
    }

    let controller =
        MissionController::with_config(vehicle.clone(), store, config.runtime.clone());
    let mut events = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MissionEvent::TeardownDegraded { state, unit }) => {
                    warn!(state = %state, unit = %unit, "teardown degraded");
                }
                Ok(event) => debug!(?event, "mission event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "mission event stream lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    controller.start(mission).context("start mission")?;

    let outcome = tokio::select! {
        outcome = controller.wait() => outcome,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listen for ctrl-c")?;
            info!("interrupt received, stopping mission");
            controller.stop().await
        }
    };

    let outcome = outcome.context("mission failed")?;
    info!(
        status = ?outcome.status,
        path = %outcome.path().join(" -> "),
        commands = vehicle.commands().len(),
        "mission finished"
    );
    Ok(())
}
