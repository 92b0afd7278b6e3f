//! Contract between channel supervisors and the sensor drivers behind them.
//!
//! Physical drivers live outside this crate; they plug in through
//! [`DriverFactory`]. The [`simulated`] drivers stand in when no hardware is
//! available.

pub mod simulated;

use crate::channel::{ChannelKind, Fields, SubSensor};
use crate::rate::SamplingPlan;

pub use simulated::SimulatedFactory;

/// Errors raised while constructing, starting or reading a driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0} sensor is not available on this device")]
    Unavailable(SubSensor),
    #[error("failed to read {sensor}: {reason}")]
    Read { sensor: SubSensor, reason: String },
}

/// A single sensing worker.
///
/// Drivers are created, started, sampled and stopped on their channel's
/// execution thread and never migrate between threads while running.
pub trait SensorDriver: Send {
    fn sensor(&self) -> SubSensor;

    /// Acquire the underlying sensor with the given plan.
    fn start(&mut self, plan: &SamplingPlan) -> Result<(), DriverError>;

    /// Take one sample. `Ok(None)` means nothing new to report.
    fn sample(&mut self) -> Result<Option<Fields>, DriverError>;

    /// Release the underlying sensor. Must tolerate being called twice.
    fn stop(&mut self);
}

/// Builds drivers for the sub-sensors of a channel.
pub trait DriverFactory: Send + Sync {
    /// Sub-sensors to run when `kind` is enabled.
    fn sensors_for(&self, kind: ChannelKind) -> Vec<SubSensor> {
        kind.sub_sensors().to_vec()
    }

    fn create(&self, sensor: SubSensor) -> Result<Box<dyn SensorDriver>, DriverError>;
}
