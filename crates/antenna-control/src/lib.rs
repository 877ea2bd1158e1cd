//! Antenna Position Control Engine
//!
//! Owns mount state for a two-axis (azimuth/elevation) antenna, enforces
//! mechanical limits, applies the calibration transform, and drives a
//! pluggable motor backend, either the Hamlib `rotctl` channel for real
//! hardware or a kinematic simulator. A cancellable tracking loop re-aims
//! the mount against an externally supplied ephemeris.

pub mod controller;
pub mod driver;
pub mod rotctl;
pub mod sim;
pub mod tracking;

#[cfg(test)]
pub(crate) mod testutil;

pub use controller::{
    AntennaController, ConnectionState, ControllerConfig, ControllerError, ControllerStatus,
    DEFAULT_SETTLE_TOLERANCE_DEG,
};
pub use driver::{DriverError, MotorDriver};
pub use rotctl::{RotctlConfig, RotctlDriver};
pub use sim::{SimulatedDriver, SimulatedDriverConfig};
pub use tracking::{EphemerisError, EphemerisSource, TargetTrack, TrackingSession};

pub use mount_model::{AntennaLimits, Position, PositionCalibration};
