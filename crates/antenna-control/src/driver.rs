//! Motor Driver Capability
//!
//! The backend-agnostic interface the controller drives. Both variants
//! (the `rotctl` hardware channel and the simulator) speak raw device-frame
//! coordinates; calibration and limit checks happen above this boundary.

use async_trait::async_trait;
use thiserror::Error;

use mount_model::Position;

#[derive(Error, Debug)]
pub enum DriverError {
    /// The channel could not be opened or the endpoint did not respond
    /// within the handshake timeout.
    #[error("connection failed: {0}")]
    Connection(String),
    /// A round-trip on an open channel timed out or produced a reply that
    /// could not be parsed.
    #[error("communication failed: {0}")]
    Communication(String),
    #[error("driver is not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// A two-axis motor backend.
///
/// Implementations are not assumed thread-safe: the controller serializes
/// all calls so exactly one command is in flight at a time.
#[async_trait]
pub trait MotorDriver: Send {
    /// Open the channel. Bounded by the driver's configured timeout.
    async fn connect(&mut self) -> Result<()>;

    /// Release the channel. Idempotent, always succeeds.
    async fn disconnect(&mut self);

    /// Query the current raw device-frame position.
    async fn read_position(&mut self) -> Result<Position>;

    /// Issue an absolute move in raw device-frame coordinates. Returns once
    /// the command is accepted, not when the mount arrives.
    async fn move_to(&mut self, raw: Position) -> Result<()>;

    /// Halt both axes immediately. Attempted even without an open session
    /// and never subject to limit checks; only a channel failure may make
    /// it fail.
    async fn stop(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;
}
