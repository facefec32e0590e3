//! Vehicle control surface.
//!
//! Actions and the failsafe talk to the vehicle only through
//! [`VehicleSurface`]. Real drivers live outside this crate; [`SimVehicle`]
//! is an in-memory implementation that records every command.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use skyfsm_core::error::{CoreError, Domain, ErrorKind};
use skyfsm_core::mission::GeoPoint;
use thiserror::Error;

/// Failure reported by a vehicle capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VehicleError {
    #[error("vehicle capability not supported: {0}")]
    NotSupported(&'static str),
    #[error("vehicle command timed out")]
    Timeout,
    #[error("vehicle disconnected")]
    Disconnected,
}

impl From<VehicleError> for CoreError {
    fn from(e: VehicleError) -> Self {
        let kind = match e {
            VehicleError::Timeout => ErrorKind::Timeout,
            VehicleError::NotSupported(_) | VehicleError::Disconnected => {
                ErrorKind::VehicleSurface
            }
        };
        CoreError::error()
            .domain(Domain::Vehicle)
            .kind(kind)
            .msgf(format_args!("{e}"))
            .build()
    }
}

/// Body-frame NED velocity command, m/s and rad/s.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Velocity {
    pub north: f64,
    pub east: f64,
    pub down: f64,
    pub yaw_rate: f64,
}

impl Velocity {
    pub const ZERO: Velocity = Velocity {
        north: 0.0,
        east: 0.0,
        down: 0.0,
        yaw_rate: 0.0,
    };

    pub fn vertical(down: f64) -> Self {
        Self {
            down,
            ..Self::ZERO
        }
    }
}

/// Gimbal orientation in degrees.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct GimbalPose {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

#[async_trait]
pub trait VehicleSurface: Send + Sync {
    async fn take_off(&self, altitude: f64) -> Result<(), VehicleError>;
    async fn land(&self) -> Result<(), VehicleError>;
    async fn hover(&self) -> Result<(), VehicleError>;
    async fn return_to_home(&self) -> Result<(), VehicleError>;
    async fn set_velocity(&self, velocity: Velocity) -> Result<(), VehicleError>;
    async fn set_global_position(&self, position: GeoPoint) -> Result<(), VehicleError>;
    async fn set_gimbal_pose(&self, pose: GimbalPose) -> Result<(), VehicleError>;
    async fn kill(&self) -> Result<(), VehicleError>;
}

/// A command received by [`SimVehicle`].
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleCommand {
    TakeOff(f64),
    Land,
    Hover,
    ReturnToHome,
    SetVelocity(Velocity),
    SetGlobalPosition(GeoPoint),
    SetGimbalPose(GimbalPose),
    Kill,
}

impl VehicleCommand {
    pub fn label(&self) -> &'static str {
        match self {
            VehicleCommand::TakeOff(_) => "take_off",
            VehicleCommand::Land => "land",
            VehicleCommand::Hover => "hover",
            VehicleCommand::ReturnToHome => "return_to_home",
            VehicleCommand::SetVelocity(_) => "set_velocity",
            VehicleCommand::SetGlobalPosition(_) => "set_global_position",
            VehicleCommand::SetGimbalPose(_) => "set_gimbal_pose",
            VehicleCommand::Kill => "kill",
        }
    }

    fn is_motion(&self) -> bool {
        matches!(
            self,
            VehicleCommand::TakeOff(_)
                | VehicleCommand::Land
                | VehicleCommand::ReturnToHome
                | VehicleCommand::SetGlobalPosition(_)
        )
    }
}

/// Simulated vehicle: records commands, optionally fails chosen capabilities
/// and takes `motion_latency` to complete take-off, landing, return-to-home
/// and position moves.
#[derive(Debug)]
pub struct SimVehicle {
    motion_latency: Duration,
    log: Mutex<Vec<VehicleCommand>>,
    failures: Mutex<HashMap<&'static str, VehicleError>>,
}

impl Default for SimVehicle {
    fn default() -> Self {
        Self::new(Duration::from_millis(10))
    }
}

impl SimVehicle {
    pub fn new(motion_latency: Duration) -> Self {
        Self {
            motion_latency,
            log: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Make every future call of the capability `label` fail with `error`.
    pub fn fail_with(&self, label: &'static str, error: VehicleError) {
        lock(&self.failures).insert(label, error);
    }

    pub fn commands(&self) -> Vec<VehicleCommand> {
        lock(&self.log).clone()
    }

    pub fn count(&self, label: &str) -> usize {
        lock(&self.log).iter().filter(|c| c.label() == label).count()
    }

    async fn apply(&self, command: VehicleCommand) -> Result<(), VehicleError> {
        let failure = lock(&self.failures).get(command.label()).cloned();
        if let Some(err) = failure {
            return Err(err);
        }
        let motion = command.is_motion();
        lock(&self.log).push(command);
        if motion && !self.motion_latency.is_zero() {
            tokio::time::sleep(self.motion_latency).await;
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poison) => poison.into_inner(),
    }
}

#[async_trait]
impl VehicleSurface for SimVehicle {
    async fn take_off(&self, altitude: f64) -> Result<(), VehicleError> {
        self.apply(VehicleCommand::TakeOff(altitude)).await
    }
    async fn land(&self) -> Result<(), VehicleError> {
        self.apply(VehicleCommand::Land).await
    }
    async fn hover(&self) -> Result<(), VehicleError> {
        self.apply(VehicleCommand::Hover).await
    }
    async fn return_to_home(&self) -> Result<(), VehicleError> {
        self.apply(VehicleCommand::ReturnToHome).await
    }
    async fn set_velocity(&self, velocity: Velocity) -> Result<(), VehicleError> {
        self.apply(VehicleCommand::SetVelocity(velocity)).await
    }
    async fn set_global_position(&self, position: GeoPoint) -> Result<(), VehicleError> {
        self.apply(VehicleCommand::SetGlobalPosition(position)).await
    }
    async fn set_gimbal_pose(&self, pose: GimbalPose) -> Result<(), VehicleError> {
        self.apply(VehicleCommand::SetGimbalPose(pose)).await
    }
    async fn kill(&self) -> Result<(), VehicleError> {
        self.apply(VehicleCommand::Kill).await
    }
}
