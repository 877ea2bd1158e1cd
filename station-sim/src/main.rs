// Station Simulation
// Runs the antenna control engine against a simulated mount and a synthetic
// target pass: the target rises in the east, transits, and sets in the west
// on a configurable period. Useful for exercising the full tracking path
// without hardware.

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time;
use tracing::{info, warn};

use antenna_control::{
    AntennaController, ControllerConfig, EphemerisError, EphemerisSource, SimulatedDriver,
    SimulatedDriverConfig, TargetTrack,
};
use mount_model::PositionCalibration;

/// Synthetic ephemeris: one pass per period, rising at az 90°, transiting
/// at the configured peak elevation, setting at az 270°. Below the horizon
/// for the second half of each period.
struct SyntheticPass {
    start: DateTime<Utc>,
    period: Duration,
    peak_elevation_deg: f64,
}

#[async_trait]
impl EphemerisSource for SyntheticPass {
    async fn look_angles(
        &self,
        _target: &str,
        at: DateTime<Utc>,
    ) -> std::result::Result<TargetTrack, EphemerisError> {
        let elapsed = (at - self.start)
            .to_std()
            .map_err(|e| EphemerisError(format!("timestamp before pass start: {e}")))?;
        let phase = (elapsed.as_secs_f64() / self.period.as_secs_f64()).fract();

        let elevation_deg = self.peak_elevation_deg * (2.0 * PI * phase).sin();
        let azimuth_deg = (90.0 + 360.0 * phase).rem_euclid(360.0);

        Ok(TargetTrack {
            azimuth_deg,
            elevation_deg,
            visible: elevation_deg >= 0.0,
        })
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "station_sim=info,antenna_control=info".to_string()),
        )
        .init();

    let speed_multiplier = env_f64("SIM_SPEED", 10.0);
    let pass_period_s = env_f64("PASS_PERIOD_S", 600.0);
    let peak_elevation_deg = env_f64("PASS_PEAK_ELEVATION", 60.0);
    let update_interval = Duration::from_millis(env_f64("UPDATE_INTERVAL_MS", 1000.0) as u64);

    let calibration_path = std::env::var("CALIBRATION_FILE")
        .unwrap_or_else(|_| "calibrations/antenna_calibration.json".to_string());
    let calibration = match mount_model::load_calibration(&calibration_path) {
        Ok(calibration) => calibration,
        Err(e) => {
            warn!(path = %calibration_path, error = %e, "using identity calibration");
            PositionCalibration::default()
        }
    };

    let driver = SimulatedDriver::new(SimulatedDriverConfig {
        speed_multiplier,
        ..Default::default()
    });
    let controller = AntennaController::new(
        Box::new(driver),
        calibration,
        ControllerConfig {
            calibration_path: calibration_path.into(),
            ..Default::default()
        },
    )?;

    controller.connect().await?;
    info!(speed_multiplier, "simulated mount connected");

    let ephemeris = Arc::new(SyntheticPass {
        start: Utc::now(),
        period: Duration::from_secs_f64(pass_period_s),
        peak_elevation_deg,
    });
    controller
        .start_tracking("synthetic-pass", ephemeris, update_interval)
        .await?;
    info!(
        pass_period_s,
        peak_elevation_deg, "tracking synthetic target pass"
    );

    let mut ticker = time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;

        match controller.get_current_position().await {
            Ok(position) => {
                let status = controller.status().await;
                let tracking = status
                    .tracking
                    .map(|t| t.active)
                    .unwrap_or(false);
                info!(%position, tracking, "mount status");
            }
            Err(e) => warn!(error = %e, "position read failed"),
        }
    }
}
