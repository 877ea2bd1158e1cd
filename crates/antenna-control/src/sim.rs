//! Simulated Motor Driver
//!
//! Kinematic stand-in for real hardware: each axis ramps toward its target
//! at a constant rate (the configured axis rate times a speed multiplier),
//! azimuth along the shortest path around the circle. Position reads
//! interpolate against a monotonic clock, so from the controller's side the
//! simulator is indistinguishable from the rotctl channel, timing aside.

use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use mount_model::Position;

use crate::driver::{DriverError, MotorDriver, Result};

#[derive(Debug, Clone)]
pub struct SimulatedDriverConfig {
    pub azimuth_rate_deg_s: f64,
    pub elevation_rate_deg_s: f64,
    /// Scales both axis rates; raise it to run accelerated tests.
    pub speed_multiplier: f64,
}

impl Default for SimulatedDriverConfig {
    fn default() -> Self {
        Self {
            azimuth_rate_deg_s: 5.0,
            elevation_rate_deg_s: 3.0,
            speed_multiplier: 1.0,
        }
    }
}

/// Signed shortest-path azimuth travel from `from` to `to`, in (−180, 180].
fn signed_azimuth_delta(from: f64, to: f64) -> f64 {
    let mut delta = (to - from).rem_euclid(360.0);
    if delta > 180.0 {
        delta -= 360.0;
    }
    delta
}

pub struct SimulatedDriver {
    config: SimulatedDriverConfig,
    connected: bool,
    /// Raw position when the current ramp began.
    origin: Position,
    target: Position,
    ramp_started: Instant,
}

impl SimulatedDriver {
    pub fn new(config: SimulatedDriverConfig) -> Self {
        Self::starting_at(config, Position::new(0.0, 0.0))
    }

    pub fn starting_at(config: SimulatedDriverConfig, position: Position) -> Self {
        Self {
            config,
            connected: false,
            origin: position.normalized(),
            target: position.normalized(),
            ramp_started: Instant::now(),
        }
    }

    /// Interpolated raw position along the constant-rate ramp.
    fn position_at(&self, now: Instant) -> Position {
        let elapsed = now
            .saturating_duration_since(self.ramp_started)
            .as_secs_f64()
            * self.config.speed_multiplier;

        let az_delta = signed_azimuth_delta(self.origin.azimuth_deg, self.target.azimuth_deg);
        let az_travel = (self.config.azimuth_rate_deg_s * elapsed).min(az_delta.abs());
        let azimuth = if az_delta == 0.0 {
            self.target.azimuth_deg
        } else {
            (self.origin.azimuth_deg + az_travel * az_delta.signum()).rem_euclid(360.0)
        };

        let el_delta = self.target.elevation_deg - self.origin.elevation_deg;
        let el_travel = (self.config.elevation_rate_deg_s * elapsed).min(el_delta.abs());
        let elevation = if el_delta == 0.0 {
            self.target.elevation_deg
        } else {
            self.origin.elevation_deg + el_travel * el_delta.signum()
        };

        Position::new(azimuth, elevation)
    }

    fn require_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DriverError::NotConnected)
        }
    }
}

#[async_trait]
impl MotorDriver for SimulatedDriver {
    async fn connect(&mut self) -> Result<()> {
        self.connected = true;
        info!(position = %self.origin, "simulated mount connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        info!("simulated mount disconnected");
    }

    async fn read_position(&mut self) -> Result<Position> {
        self.require_connected()?;
        Ok(self.position_at(Instant::now()))
    }

    async fn move_to(&mut self, raw: Position) -> Result<()> {
        self.require_connected()?;
        let now = Instant::now();
        self.origin = self.position_at(now);
        self.target = raw.normalized();
        self.ramp_started = now;
        debug!(from = %self.origin, to = %self.target, "simulated move accepted");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        // Freeze at the interpolated point. Like the hardware channel, a
        // halt is never gated on connection state.
        let now = Instant::now();
        self.origin = self.position_at(now);
        self.target = self.origin;
        self.ramp_started = now;
        debug!(at = %self.origin, "simulated mount halted");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
