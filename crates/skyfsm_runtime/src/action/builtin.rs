//! Built-in action kinds.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use skyfsm_core::error::{CoreError, Domain, ErrorKind, Result};
use skyfsm_core::mission::{duration, ActionKind, GeoPoint, PidGains};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::{Action, ActionContext, Pid};
use crate::vehicle::{GimbalPose, Velocity, VehicleError};

/// Event announced by [`TrackAction`] when the target stays out of sight.
pub const TRACK_TIMEOUT_EVENT: &str = "timeout";

/// Gimbal pitch used while tracking, degrees below the horizon.
const TRACK_GIMBAL_PITCH: f64 = -45.0;

/// Build the action declared by `id`.
pub fn instantiate(id: &str, kind: &ActionKind) -> Result<Box<dyn Action>> {
    let action: Box<dyn Action> = match kind {
        ActionKind::TakeOff { altitude } => Box::new(TakeOffAction {
            altitude: *altitude,
        }),
        ActionKind::Land => Box::new(LandAction),
        ActionKind::Hover { seconds } => Box::new(HoverAction {
            hold: seconds
                .map(|s| duration("hover seconds", s, id))
                .transpose()?,
        }),
        ActionKind::ReturnHome => Box::new(ReturnHomeAction),
        ActionKind::Patrol {
            waypoints,
            dwell_seconds,
            loops,
        } => Box::new(PatrolAction::new(
            waypoints.clone(),
            duration("patrol dwell_seconds", *dwell_seconds, id)?,
            *loops,
        )),
        ActionKind::Track {
            source,
            class,
            gain,
            max_speed,
            lost_timeout_seconds,
        } => Box::new(TrackAction::new(
            source.clone(),
            class.clone(),
            *gain,
            *max_speed,
            lost_timeout_seconds
                .map(|s| duration("track lost_timeout_seconds", s, id))
                .transpose()?,
        )),
        ActionKind::Elevate { climb, speed } => Box::new(ElevateAction {
            climb: *climb,
            speed: *speed,
        }),
        ActionKind::Idle => Box::new(IdleAction),
    };
    Ok(action)
}

/// Issue a vehicle command unless cancelled first.
/// `Ok(false)` means the action was cancelled and should return.
async fn command<F>(ctx: &ActionContext, fut: F) -> Result<bool>
where
    F: Future<Output = std::result::Result<(), VehicleError>>,
{
    match ctx.guard(fut).await {
        Some(result) => {
            result?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TakeOffAction {
    pub altitude: f64,
}

#[async_trait]
impl Action for TakeOffAction {
    fn kind(&self) -> &'static str {
        "take_off"
    }

    async fn execute(&mut self, ctx: &ActionContext) -> Result<()> {
        info!(state = ctx.state(), altitude = self.altitude, "taking off");
        command(ctx, ctx.vehicle().take_off(self.altitude)).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LandAction;

#[async_trait]
impl Action for LandAction {
    fn kind(&self) -> &'static str {
        "land"
    }

    async fn execute(&mut self, ctx: &ActionContext) -> Result<()> {
        info!(state = ctx.state(), "landing");
        command(ctx, ctx.vehicle().land()).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnHomeAction;

#[async_trait]
impl Action for ReturnHomeAction {
    fn kind(&self) -> &'static str {
        "return_home"
    }

    async fn execute(&mut self, ctx: &ActionContext) -> Result<()> {
        info!(state = ctx.state(), "returning home");
        command(ctx, ctx.vehicle().return_to_home()).await?;
        Ok(())
    }
}

/// Hold position, for `hold` or until cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct HoverAction {
    pub hold: Option<Duration>,
}

#[async_trait]
impl Action for HoverAction {
    fn kind(&self) -> &'static str {
        "hover"
    }

    async fn execute(&mut self, ctx: &ActionContext) -> Result<()> {
        if !command(ctx, ctx.vehicle().hover()).await? {
            return Ok(());
        }
        match self.hold {
            Some(hold) => {
                ctx.pause(hold).await;
            }
            None => ctx.cancelled().await,
        }
        Ok(())
    }
}

/// Fly through the waypoints in order, dwelling at each.
#[derive(Debug, Clone, PartialEq)]
pub struct PatrolAction {
    waypoints: Vec<GeoPoint>,
    dwell: Duration,
    loops: Option<u32>,
    completed_loops: u32,
}

impl PatrolAction {
    pub fn new(waypoints: Vec<GeoPoint>, dwell: Duration, loops: Option<u32>) -> Self {
        Self {
            waypoints,
            dwell,
            loops,
            completed_loops: 0,
        }
    }

    pub fn completed_loops(&self) -> u32 {
        self.completed_loops
    }
}

#[async_trait]
impl Action for PatrolAction {
    fn kind(&self) -> &'static str {
        "patrol"
    }

    async fn execute(&mut self, ctx: &ActionContext) -> Result<()> {
        loop {
            for (index, waypoint) in self.waypoints.iter().enumerate() {
                debug!(state = ctx.state(), index, lat = waypoint.lat, lon = waypoint.lon, "patrol leg");
                if !command(ctx, ctx.vehicle().set_global_position(*waypoint)).await? {
                    return Ok(());
                }
                if !ctx.pause(self.dwell).await {
                    return Ok(());
                }
            }
            self.completed_loops += 1;
            if self.loops.is_some_and(|limit| self.completed_loops >= limit) {
                return Ok(());
            }
        }
    }
}

/// Keep the best detection of `class` centered using velocity commands.
///
/// Never completes on its own. If `lost_timeout` is set and the target has
/// not been seen for that long, announces `timeout` once per loss and keeps
/// holding position.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackAction {
    source: String,
    class: String,
    max_speed: f64,
    lost_timeout: Option<Duration>,
    lateral: Pid,
    vertical: Pid,
}

impl TrackAction {
    pub fn new(
        source: String,
        class: String,
        gains: PidGains,
        max_speed: f64,
        lost_timeout: Option<Duration>,
    ) -> Self {
        Self {
            source,
            class,
            max_speed,
            lost_timeout,
            lateral: Pid::new(gains),
            vertical: Pid::new(gains),
        }
    }

    fn clamp(&self, v: f64) -> f64 {
        v.clamp(-self.max_speed, self.max_speed)
    }
}

#[async_trait]
impl Action for TrackAction {
    fn kind(&self) -> &'static str {
        "track"
    }

    async fn execute(&mut self, ctx: &ActionContext) -> Result<()> {
        let pose = GimbalPose {
            pitch: TRACK_GIMBAL_PITCH,
            ..GimbalPose::default()
        };
        if !command(ctx, ctx.vehicle().set_gimbal_pose(pose)).await? {
            return Ok(());
        }

        let mut ticker = tokio::time::interval(ctx.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = Instant::now();
        let mut last_seen = last_tick;
        let mut timeout_announced = false;

        loop {
            if ctx.guard(ticker.tick()).await.is_none() {
                return Ok(());
            }
            let now = Instant::now();
            let dt = now.duration_since(last_tick).as_secs_f64();
            last_tick = now;

            let target = ctx
                .compute()
                .get_result(&self.source)
                .and_then(|result| result.best(&self.class, 0.0).cloned());

            let velocity = match target {
                Some(detection) => {
                    last_seen = now;
                    timeout_announced = false;
                    let east = self.lateral.update(detection.offset_x, dt);
                    let down = self.vertical.update(detection.offset_y, dt);
                    Velocity {
                        east: self.clamp(east),
                        down: self.clamp(down),
                        ..Velocity::ZERO
                    }
                }
                None => {
                    self.lateral.reset();
                    self.vertical.reset();
                    Velocity::ZERO
                }
            };

            if !command(ctx, ctx.vehicle().set_velocity(velocity)).await? {
                return Ok(());
            }

            if let Some(limit) = self.lost_timeout {
                if !timeout_announced && now.duration_since(last_seen) >= limit {
                    info!(state = ctx.state(), class = %self.class, "target lost");
                    ctx.announce(TRACK_TIMEOUT_EVENT);
                    timeout_announced = true;
                }
            }
        }
    }
}

/// Climb (positive) or descend (negative) by `climb` meters at `speed` m/s.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevateAction {
    pub climb: f64,
    pub speed: f64,
}

#[async_trait]
impl Action for ElevateAction {
    fn kind(&self) -> &'static str {
        "elevate"
    }

    async fn execute(&mut self, ctx: &ActionContext) -> Result<()> {
        let down = if self.climb >= 0.0 {
            -self.speed
        } else {
            self.speed
        };
        let hold = Duration::try_from_secs_f64(self.climb.abs() / self.speed).map_err(|e| {
            CoreError::error()
                .domain(Domain::Action)
                .kind(ErrorKind::ActionExecution)
                .msgf(format_args!(
                    "cannot climb {} m at {} m/s: {e}",
                    self.climb, self.speed
                ))
                .build()
        })?;

        if !command(ctx, ctx.vehicle().set_velocity(Velocity::vertical(down))).await? {
            return Ok(());
        }
        if !ctx.pause(hold).await {
            return Ok(());
        }
        command(ctx, ctx.vehicle().set_velocity(Velocity::ZERO)).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdleAction;

#[async_trait]
impl Action for IdleAction {
    fn kind(&self) -> &'static str {
        "idle"
    }

    async fn execute(&mut self, ctx: &ActionContext) -> Result<()> {
        ctx.cancelled().await;
        Ok(())
    }
}
