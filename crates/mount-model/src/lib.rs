//! Mount Position Model
//!
//! Value types for a two-axis (azimuth/elevation) antenna mount:
//! pointing positions, the calibration transform between real-world and
//! device-native frames, and the mechanical safety envelope.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod calibration;
pub mod store;

pub use calibration::PositionCalibration;
pub use store::{load_calibration, save_calibration, StoreError};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("invalid limits: {0}")]
    InvalidLimits(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// A mount pointing direction in degrees.
///
/// Azimuth is circular (0°=north); elevation is horizon-relative
/// (0°=horizon, 90°=zenith) and left unconstrained here; the envelope
/// lives in [`AntennaLimits`]. Angles are stored exactly as given so that
/// limit checks see the caller's request; the calibration transform and
/// the drivers normalize azimuth where the circular frame requires it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

impl Position {
    pub fn new(azimuth_deg: f64, elevation_deg: f64) -> Self {
        Self {
            azimuth_deg,
            elevation_deg,
        }
    }

    /// Same direction with azimuth wrapped into 0–360°.
    pub fn normalized(&self) -> Self {
        Self {
            azimuth_deg: self.azimuth_deg.rem_euclid(360.0),
            elevation_deg: self.elevation_deg,
        }
    }

    /// Shortest angular separation on the azimuth axis, handling the
    /// 0°/360° wraparound.
    pub fn azimuth_separation(&self, other: &Position) -> f64 {
        let mut delta = (self.azimuth_deg.rem_euclid(360.0) - other.azimuth_deg.rem_euclid(360.0)).abs();
        if delta > 180.0 {
            delta = 360.0 - delta;
        }
        delta
    }

    pub fn elevation_separation(&self, other: &Position) -> f64 {
        (self.elevation_deg - other.elevation_deg).abs()
    }

    /// True when both axes are within `tolerance_deg` of `other`.
    pub fn within(&self, other: &Position, tolerance_deg: f64) -> bool {
        self.azimuth_separation(other) <= tolerance_deg
            && self.elevation_separation(other) <= tolerance_deg
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "az={:.2}° el={:.2}°", self.azimuth_deg, self.elevation_deg)
    }
}

/// Mechanical safety envelope of the mount, in real-world (target-frame)
/// degrees and degrees per second.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AntennaLimits {
    pub min_azimuth_deg: f64,
    pub max_azimuth_deg: f64,
    pub min_elevation_deg: f64,
    pub max_elevation_deg: f64,
    pub max_azimuth_rate_deg_s: f64,
    pub max_elevation_rate_deg_s: f64,
}

impl Default for AntennaLimits {
    fn default() -> Self {
        Self {
            min_azimuth_deg: 0.0,
            max_azimuth_deg: 360.0,
            min_elevation_deg: 0.0,
            max_elevation_deg: 90.0,
            max_azimuth_rate_deg_s: 5.0,
            max_elevation_rate_deg_s: 3.0,
        }
    }
}

impl AntennaLimits {
    pub fn validate(&self) -> Result<()> {
        if self.min_azimuth_deg > self.max_azimuth_deg {
            return Err(ModelError::InvalidLimits(format!(
                "min azimuth {}° exceeds max {}°",
                self.min_azimuth_deg, self.max_azimuth_deg
            )));
        }
        if self.min_elevation_deg > self.max_elevation_deg {
            return Err(ModelError::InvalidLimits(format!(
                "min elevation {}° exceeds max {}°",
                self.min_elevation_deg, self.max_elevation_deg
            )));
        }
        if self.max_azimuth_rate_deg_s <= 0.0 || self.max_elevation_rate_deg_s <= 0.0 {
            return Err(ModelError::InvalidLimits(
                "axis rates must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Check a target-frame position against the envelope. Note the check is
    /// on the raw caller-supplied angles, before any azimuth normalization:
    /// a request for az=400° is out of a 0–360 envelope, not wrapped into it.
    pub fn contains_raw_request(&self, azimuth_deg: f64, elevation_deg: f64) -> bool {
        azimuth_deg >= self.min_azimuth_deg
            && azimuth_deg <= self.max_azimuth_deg
            && elevation_deg >= self.min_elevation_deg
            && elevation_deg <= self.max_elevation_deg
    }

    pub fn contains(&self, position: &Position) -> bool {
        self.contains_raw_request(position.azimuth_deg, position.elevation_deg)
    }
}
