//! Calibration Transform
//!
//! Maps between target positions (desired, real-world frame) and raw
//! positions (device-native frame). Offsets shift each axis; inversion
//! mirrors an axis for mounts wired or mounted in the opposite sense.
//! The transform is exactly invertible.

use serde::{Deserialize, Serialize};

use crate::Position;

/// Offset and inversion parameters reconciling the real-world and
/// device coordinate frames.
///
/// Azimuth inversion mirrors the circle: `raw = (360 − (target + offset)) mod 360`.
/// Elevation inversion mirrors the 0–90° span (`raw = 90 − (target + offset)`),
/// which is how a zenith-origin mount (0°=zenith) is expressed without
/// hardcoding either convention.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionCalibration {
    pub azimuth_offset_deg: f64,
    pub elevation_offset_deg: f64,
    pub azimuth_inverted: bool,
    pub elevation_inverted: bool,
}

impl Default for PositionCalibration {
    fn default() -> Self {
        Self {
            azimuth_offset_deg: 0.0,
            elevation_offset_deg: 0.0,
            azimuth_inverted: false,
            elevation_inverted: false,
        }
    }
}

impl PositionCalibration {
    /// Convert a target-frame position into the raw device frame.
    pub fn target_to_raw(&self, target: &Position) -> Position {
        let shifted_az = target.azimuth_deg + self.azimuth_offset_deg;
        let raw_az = if self.azimuth_inverted {
            (360.0 - shifted_az).rem_euclid(360.0)
        } else {
            shifted_az.rem_euclid(360.0)
        };

        let shifted_el = target.elevation_deg + self.elevation_offset_deg;
        let raw_el = if self.elevation_inverted {
            90.0 - shifted_el
        } else {
            shifted_el
        };

        Position::new(raw_az, raw_el)
    }

    /// Convert a raw device-frame position back into the target frame.
    /// Inverse of [`target_to_raw`](Self::target_to_raw) within 1e-6°.
    pub fn raw_to_target(&self, raw: &Position) -> Position {
        let shifted_az = if self.azimuth_inverted {
            360.0 - raw.azimuth_deg
        } else {
            raw.azimuth_deg
        };
        let target_az = (shifted_az - self.azimuth_offset_deg).rem_euclid(360.0);

        let shifted_el = if self.elevation_inverted {
            90.0 - raw.elevation_deg
        } else {
            raw.elevation_deg
        };
        let target_el = shifted_el - self.elevation_offset_deg;

        Position::new(target_az, target_el)
    }
}
