//! Scripted detections fed into the in-memory compute store, so object
//! events can fire while a mission runs against the simulated vehicle.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Error};
use skyfsm_runtime::compute::{ComputeResult, Detection, MemoryResultStore, ResultStore};
use tracing::debug;

/// `source/class@start+seconds`: publish a `class` detection under `source`
/// from `start` seconds after launch, for `seconds`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub source: String,
    pub class: String,
    pub start: Duration,
    pub duration: Duration,
}

impl FromStr for Sighting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let shape = || anyhow!("sighting '{s}': expected source/class@start+seconds");
        let (target, timing) = s.split_once('@').ok_or_else(shape)?;
        let (source, class) = target.split_once('/').ok_or_else(shape)?;
        let (start, duration) = timing.split_once('+').ok_or_else(shape)?;
        if source.is_empty() || class.is_empty() {
            return Err(shape());
        }
        Ok(Self {
            source: source.to_string(),
            class: class.to_string(),
            start: seconds(start).with_context(|| format!("sighting '{s}' start"))?,
            duration: seconds(duration).with_context(|| format!("sighting '{s}' duration"))?,
        })
    }
}

fn seconds(value: &str) -> anyhow::Result<Duration> {
    let secs: f64 = value.trim().parse()?;
    Duration::try_from_secs_f64(secs).map_err(Error::from)
}

/// Publish the sighting every `tick` while it lasts, then clear it.
///
/// A duration past the clock's range never ends.
pub async fn replay(store: Arc<MemoryResultStore>, sighting: Sighting, tick: Duration) {
    tokio::time::sleep(sighting.start).await;
    debug!(source = %sighting.source, class = %sighting.class, "sighting begins");

    let until = tokio::time::Instant::now().checked_add(sighting.duration);
    while until.map_or(true, |until| tokio::time::Instant::now() < until) {
        store.publish(
            sighting.source.clone(),
            ComputeResult::new(vec![Detection::new(sighting.class.clone(), 0.9)]),
        );
        tokio::time::sleep(tick).await;
    }

    store.clear_result(&sighting.source);
    debug!(source = %sighting.source, class = %sighting.class, "sighting ends");
}
