//! Calibration File Store
//!
//! JSON persistence for [`PositionCalibration`]. The on-disk schema is
//! stable: unknown fields are ignored on load and missing fields fall back
//! to the identity calibration, so files written by older or newer
//! revisions stay readable.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::PositionCalibration;

const SCHEMA_VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("calibration file i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("calibration file format: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    #[serde(default)]
    azimuth_offset: f64,
    #[serde(default)]
    elevation_offset: f64,
    #[serde(default)]
    azimuth_inverted: bool,
    #[serde(default)]
    elevation_inverted: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    version: Option<String>,
}

impl From<&PositionCalibration> for CalibrationFile {
    fn from(cal: &PositionCalibration) -> Self {
        Self {
            azimuth_offset: cal.azimuth_offset_deg,
            elevation_offset: cal.elevation_offset_deg,
            azimuth_inverted: cal.azimuth_inverted,
            elevation_inverted: cal.elevation_inverted,
            created_at: Some(Utc::now()),
            version: Some(SCHEMA_VERSION.to_string()),
        }
    }
}

impl From<CalibrationFile> for PositionCalibration {
    fn from(file: CalibrationFile) -> Self {
        Self {
            azimuth_offset_deg: file.azimuth_offset,
            elevation_offset_deg: file.elevation_offset,
            azimuth_inverted: file.azimuth_inverted,
            elevation_inverted: file.elevation_inverted,
        }
    }
}

/// Load a calibration from a JSON file. A missing file is an `Io` error;
/// the caller decides whether defaults are an acceptable fallback.
pub fn load_calibration(path: impl AsRef<Path>) -> Result<PositionCalibration, StoreError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let file: CalibrationFile = serde_json::from_str(&contents)?;
    let calibration = PositionCalibration::from(file);
    info!(path = %path.as_ref().display(), "calibration loaded");
    Ok(calibration)
}

/// Save a calibration to a JSON file, creating parent directories as needed.
pub fn save_calibration(
    path: impl AsRef<Path>,
    calibration: &PositionCalibration,
) -> Result<(), StoreError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = CalibrationFile::from(calibration);
    std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
    info!(path = %path.display(), "calibration saved");
    Ok(())
}
