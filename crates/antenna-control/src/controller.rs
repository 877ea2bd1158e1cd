//! Antenna Controller
//!
//! Orchestrates a [`MotorDriver`] behind the calibration transform and the
//! mechanical limit envelope. The controller is a cheap-to-clone handle;
//! all driver commands serialize behind one mutex so exactly one command is
//! in flight at a time, while status reads, `stop` and `emergency_stop`
//! stay responsive during a hardware round-trip.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use mount_model::{AntennaLimits, Position, PositionCalibration, StoreError};

use crate::driver::{DriverError, MotorDriver};
use crate::tracking::{TrackingHandle, TrackingSession};

/// Two raw reads closer than this count as "no motion" when confirming the
/// mount is halted before the emergency latch clears.
const MOTION_EPSILON_DEG: f64 = 0.05;

/// Arrival tolerance used by [`AntennaController::slew_to`].
pub const DEFAULT_SETTLE_TOLERANCE_DEG: f64 = 0.5;

/// Connection lifecycle of the controller. The driver only reports raw
/// connectivity; this is the controller's interpretation of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("controller is not connected")]
    NotConnected,
    #[error("a connection attempt is already in progress")]
    Busy,
    #[error("a tracking session is already active")]
    AlreadyTracking,
    #[error("emergency stop is active")]
    EmergencyStopActive,
    #[error("target az={azimuth_deg:.1}° el={elevation_deg:.1}° is outside the mount limits")]
    OutOfLimits { azimuth_deg: f64, elevation_deg: f64 },
    #[error("timed out waiting for the mount to reach the target")]
    Timeout,
    #[error("mount motion could not be confirmed halted; emergency stop stays latched")]
    UnsafeToReset,
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Model(#[from] mount_model::ModelError),
    #[error("calibration store: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub limits: AntennaLimits,
    /// Cadence of the settle loop and of the halt-confirmation reads.
    pub poll_interval: Duration,
    /// Where `set_calibration(.., persist: true)` writes the calibration.
    pub calibration_path: PathBuf,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            limits: AntennaLimits::default(),
            poll_interval: Duration::from_millis(200),
            calibration_path: PathBuf::from("calibrations/antenna_calibration.json"),
        }
    }
}

/// Serializable snapshot of controller state. Pure snapshot: reading the
/// live position needs a driver round-trip and stays a separate call.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub state: ConnectionState,
    pub emergency_stop: bool,
    pub calibration: PositionCalibration,
    pub limits: AntennaLimits,
    pub tracking: Option<TrackingSession>,
}

pub(crate) struct Inner {
    pub(crate) driver: Mutex<Box<dyn MotorDriver>>,
    pub(crate) state: RwLock<ConnectionState>,
    pub(crate) calibration: RwLock<PositionCalibration>,
    pub(crate) emergency_stop: AtomicBool,
    pub(crate) tracking: Mutex<Option<TrackingHandle>>,
    pub(crate) config: ControllerConfig,
}

/// Handle to one antenna mount. Clones share the same mount state.
#[derive(Clone)]
pub struct AntennaController {
    pub(crate) inner: Arc<Inner>,
}

impl AntennaController {
    pub fn new(
        driver: Box<dyn MotorDriver>,
        calibration: PositionCalibration,
        config: ControllerConfig,
    ) -> Result<Self> {
        config.limits.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                driver: Mutex::new(driver),
                state: RwLock::new(ConnectionState::Disconnected),
                calibration: RwLock::new(calibration),
                emergency_stop: AtomicBool::new(false),
                tracking: Mutex::new(None),
                config,
            }),
        })
    }

    /// Open the driver channel. A no-op when already connected; `Busy` when
    /// a connection attempt is mid-flight on another task.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.inner.state.write().await;
            match *state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => return Err(ControllerError::Busy),
                _ => *state = ConnectionState::Connecting,
            }
        }

        let result = {
            let mut driver = self.inner.driver.lock().await;
            driver.connect().await
        };

        let mut state = self.inner.state.write().await;
        match result {
            Ok(()) => {
                *state = ConnectionState::Connected;
                info!("mount connected");
                Ok(())
            }
            Err(e) => {
                *state = ConnectionState::Error;
                warn!(error = %e, "mount connection failed");
                Err(e.into())
            }
        }
    }

    /// Cancel tracking, quiesce any motion best-effort, release the channel.
    pub async fn disconnect(&self) {
        self.cancel_tracking().await;

        let mut driver = self.inner.driver.lock().await;
        if driver.is_connected() {
            if let Err(e) = driver.stop().await {
                warn!(error = %e, "halt on disconnect failed");
            }
        }
        driver.disconnect().await;
        drop(driver);

        *self.inner.state.write().await = ConnectionState::Disconnected;
        info!("mount disconnected");
    }

    async fn check_move_preconditions(&self, target: &Position) -> Result<()> {
        if self.inner.emergency_stop.load(Ordering::SeqCst) {
            return Err(ControllerError::EmergencyStopActive);
        }
        if *self.inner.state.read().await != ConnectionState::Connected {
            return Err(ControllerError::NotConnected);
        }
        // Limits are defined in real-world terms: the check runs on the
        // target frame, before calibration.
        if !self.inner.config.limits.contains(target) {
            return Err(ControllerError::OutOfLimits {
                azimuth_deg: target.azimuth_deg,
                elevation_deg: target.elevation_deg,
            });
        }
        Ok(())
    }

    /// Issue a calibrated, limit-checked move and return once the driver
    /// accepts the command (fire-and-forget; the tracking loop uses this to
    /// keep its cadence).
    pub async fn move_to(&self, target: Position) -> Result<()> {
        self.check_move_preconditions(&target).await?;

        let raw = self.inner.calibration.read().await.target_to_raw(&target);
        let result = {
            let mut driver = self.inner.driver.lock().await;
            driver.move_to(raw).await
        };
        match result {
            Ok(()) => {
                debug!(%target, %raw, "move accepted");
                Ok(())
            }
            Err(e) => {
                self.note_driver_failure(&e).await;
                Err(e.into())
            }
        }
    }

    /// [`move_to`](Self::move_to), then poll until the calibrated position
    /// is within `tolerance_deg` of the target on both axes or `timeout`
    /// elapses. An emergency stop raised mid-wait is observed within one
    /// polling tick: the mount is halted and `EmergencyStopActive` returned.
    pub async fn move_and_settle(
        &self,
        target: Position,
        tolerance_deg: f64,
        timeout: Duration,
    ) -> Result<()> {
        self.move_to(target).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            sleep(self.inner.config.poll_interval).await;

            if self.inner.emergency_stop.load(Ordering::SeqCst) {
                if let Err(e) = self.halt_driver().await {
                    warn!(error = %e, "halt after emergency stop failed");
                }
                return Err(ControllerError::EmergencyStopActive);
            }

            let current = self.get_current_position().await?;
            if current.within(&target, tolerance_deg) {
                debug!(%current, "settled on target");
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                if let Err(e) = self.halt_driver().await {
                    warn!(error = %e, "halt after settle timeout failed");
                }
                return Err(ControllerError::Timeout);
            }
        }
    }

    /// [`move_and_settle`](Self::move_and_settle) with the default arrival
    /// tolerance.
    pub async fn slew_to(&self, target: Position, timeout: Duration) -> Result<()> {
        self.move_and_settle(target, DEFAULT_SETTLE_TOLERANCE_DEG, timeout)
            .await
    }

    /// Read the raw device position and map it back to the target frame.
    pub async fn get_current_position(&self) -> Result<Position> {
        if *self.inner.state.read().await != ConnectionState::Connected {
            return Err(ControllerError::NotConnected);
        }

        let result = {
            let mut driver = self.inner.driver.lock().await;
            driver.read_position().await
        };
        match result {
            Ok(raw) => Ok(self.inner.calibration.read().await.raw_to_target(&raw)),
            Err(e) => {
                self.note_driver_failure(&e).await;
                Err(e.into())
            }
        }
    }

    /// Halt both axes and clear any tracking session. Always attempts the
    /// driver halt regardless of connection state; never clears the
    /// emergency latch.
    pub async fn stop(&self) -> Result<()> {
        self.cancel_tracking().await;
        match self.halt_driver().await {
            Ok(()) => {
                info!("mount halted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Latch the emergency stop, cancel tracking and halt the mount.
    /// Infallible: a failing driver halt is logged, the latch stays set.
    pub async fn emergency_stop(&self) {
        self.inner.emergency_stop.store(true, Ordering::SeqCst);
        warn!("emergency stop latched");

        self.cancel_tracking().await;
        if let Err(e) = self.halt_driver().await {
            error!(error = %e, "emergency halt failed; latch remains set");
        }
    }

    /// Clear the emergency latch, but only after confirming the mount is
    /// actually halted: two raw reads one polling tick apart must agree.
    pub async fn reset_emergency_stop(&self) -> Result<()> {
        if !self.inner.emergency_stop.load(Ordering::SeqCst) {
            return Ok(());
        }
        // Without a channel, motion cannot be confirmed halted.
        if *self.inner.state.read().await != ConnectionState::Connected {
            return Err(ControllerError::UnsafeToReset);
        }

        let first = self.read_raw().await?;
        sleep(self.inner.config.poll_interval).await;
        let second = self.read_raw().await?;

        if first.within(&second, MOTION_EPSILON_DEG) {
            self.inner.emergency_stop.store(false, Ordering::SeqCst);
            info!("emergency stop cleared");
            Ok(())
        } else {
            warn!(%first, %second, "mount still moving, refusing to clear emergency stop");
            Err(ControllerError::UnsafeToReset)
        }
    }

    /// Replace the active calibration; optionally persist it to the
    /// configured calibration file.
    pub async fn set_calibration(
        &self,
        calibration: PositionCalibration,
        persist: bool,
    ) -> Result<()> {
        *self.inner.calibration.write().await = calibration;
        info!(
            az_offset = calibration.azimuth_offset_deg,
            el_offset = calibration.elevation_offset_deg,
            az_inverted = calibration.azimuth_inverted,
            el_inverted = calibration.elevation_inverted,
            "calibration replaced"
        );
        if persist {
            mount_model::save_calibration(&self.inner.config.calibration_path, &calibration)?;
        }
        Ok(())
    }

    /// Pure limits predicate, usable before issuing a move.
    pub fn is_position_safe(&self, position: &Position) -> bool {
        self.inner.config.limits.contains(position)
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.inner.emergency_stop.load(Ordering::SeqCst)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    pub async fn calibration(&self) -> PositionCalibration {
        *self.inner.calibration.read().await
    }

    pub fn limits(&self) -> AntennaLimits {
        self.inner.config.limits
    }

    pub async fn status(&self) -> ControllerStatus {
        let tracking = self
            .inner
            .tracking
            .lock()
            .await
            .as_ref()
            .map(TrackingHandle::session);
        ControllerStatus {
            state: *self.inner.state.read().await,
            emergency_stop: self.is_emergency_stopped(),
            calibration: *self.inner.calibration.read().await,
            limits: self.inner.config.limits,
            tracking,
        }
    }

    /// Issue a driver halt; a connectivity failure downgrades the state.
    pub(crate) async fn halt_driver(&self) -> std::result::Result<(), DriverError> {
        let result = {
            let mut driver = self.inner.driver.lock().await;
            driver.stop().await
        };
        if let Err(ref e) = result {
            self.note_driver_failure(e).await;
        }
        result
    }

    /// Cooperatively cancel the active tracking session, if any. Returns
    /// whether a session was cancelled.
    pub(crate) async fn cancel_tracking(&self) -> bool {
        let handle = self.inner.tracking.lock().await.take();
        match handle {
            Some(handle) => {
                handle.cancel();
                info!(target = %handle.target, "tracking session cancelled");
                true
            }
            None => false,
        }
    }

    /// Raw device read without the calibration transform.
    async fn read_raw(&self) -> Result<Position> {
        let result = {
            let mut driver = self.inner.driver.lock().await;
            driver.read_position().await
        };
        match result {
            Ok(raw) => Ok(raw),
            Err(e) => {
                self.note_driver_failure(&e).await;
                Err(e.into())
            }
        }
    }

    /// A driver-boundary failure on an open channel means connectivity is
    /// gone: downgrade to `Error` so subsequent calls fail fast until a
    /// fresh `connect` recovers.
    async fn note_driver_failure(&self, error: &DriverError) {
        let mut state = self.inner.state.write().await;
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Error;
            warn!(%error, "driver failure, connection state downgraded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedDriver, SimulatedDriverConfig};
    use crate::testutil::{DriverCall, MockDriver};

    fn test_config() -> ControllerConfig {
        ControllerConfig {
            poll_interval: Duration::from_millis(10),
            calibration_path: std::env::temp_dir().join(format!(
                "antenna-control-{}-calibration.json",
                std::process::id()
            )),
            ..Default::default()
        }
    }

    fn connected_controller() -> (AntennaController, MockDriver) {
        let mock = MockDriver::new(Position::new(0.0, 0.0));
        let controller = AntennaController::new(
            Box::new(mock.clone()),
            PositionCalibration::default(),
            test_config(),
        )
        .unwrap();
        (controller, mock)
    }

    #[tokio::test]
    async fn test_move_rejected_before_connect() {
        let (controller, mock) = connected_controller();
        let err = controller.move_to(Position::new(10.0, 10.0)).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotConnected));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (controller, mock) = connected_controller();
        controller.connect().await.unwrap();
        controller.connect().await.unwrap();
        assert_eq!(
            mock.calls()
                .iter()
                .filter(|c| matches!(c, DriverCall::Connect))
                .count(),
            1
        );
        assert_eq!(controller.connection_state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_connect_busy_while_mid_transition() {
        let (controller, mock) = connected_controller();
        mock.delay_connect(Duration::from_millis(50));

        let racer = controller.clone();
        let first = tokio::spawn(async move { racer.connect().await });
        sleep(Duration::from_millis(10)).await;

        let err = controller.connect().await.unwrap_err();
        assert!(matches!(err, ControllerError::Busy));

        first.await.unwrap().unwrap();
        assert_eq!(controller.connection_state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_halts_and_releases_channel() {
        let (controller, mock) = connected_controller();
        controller.connect().await.unwrap();
        mock.clear_calls();

        controller.disconnect().await;

        let calls = mock.calls();
        assert!(calls.contains(&DriverCall::Stop));
        assert!(calls.contains(&DriverCall::Disconnect));
        assert_eq!(
            controller.connection_state().await,
            ConnectionState::Disconnected
        );

        let err = controller.move_to(Position::new(10.0, 10.0)).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotConnected));
    }

    #[tokio::test]
    async fn test_out_of_limits_issues_no_driver_call() {
        let (controller, mock) = connected_controller();
        controller.connect().await.unwrap();
        mock.clear_calls();

        let err = controller.move_to(Position::new(400.0, 45.0)).await.unwrap_err();
        assert!(matches!(err, ControllerError::OutOfLimits { .. }));

        let err = controller.move_to(Position::new(180.0, 95.0)).await.unwrap_err();
        assert!(matches!(err, ControllerError::OutOfLimits { .. }));

        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_in_limits_move_reaches_driver_in_raw_frame() {
        let (controller, mock) = connected_controller();
        controller.connect().await.unwrap();
        mock.clear_calls();

        controller.move_to(Position::new(180.0, 45.0)).await.unwrap();
        match mock.calls().as_slice() {
            [DriverCall::MoveTo(raw)] => {
                assert!(raw.within(&Position::new(180.0, 45.0), 1e-9));
            }
            other => panic!("unexpected driver calls: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_calibration_applied_before_driver() {
        let mock = MockDriver::new(Position::new(0.0, 0.0));
        let controller = AntennaController::new(
            Box::new(mock.clone()),
            PositionCalibration {
                azimuth_offset_deg: 10.0,
                elevation_offset_deg: -5.0,
                ..Default::default()
            },
            test_config(),
        )
        .unwrap();
        controller.connect().await.unwrap();
        mock.clear_calls();

        controller.move_to(Position::new(90.0, 45.0)).await.unwrap();
        match mock.calls().as_slice() {
            [DriverCall::MoveTo(raw)] => {
                assert!(raw.within(&Position::new(100.0, 40.0), 1e-9));
            }
            other => panic!("unexpected driver calls: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_current_position_inverts_calibration() {
        let mock = MockDriver::new(Position::new(100.0, 40.0));
        let controller = AntennaController::new(
            Box::new(mock.clone()),
            PositionCalibration {
                azimuth_offset_deg: 10.0,
                elevation_offset_deg: -5.0,
                ..Default::default()
            },
            test_config(),
        )
        .unwrap();
        controller.connect().await.unwrap();

        let position = controller.get_current_position().await.unwrap();
        assert!(position.within(&Position::new(90.0, 45.0), 1e-9));
    }

    #[tokio::test]
    async fn test_emergency_stop_precedence() {
        let (controller, mock) = connected_controller();
        controller.connect().await.unwrap();

        controller.emergency_stop().await;
        assert!(controller.is_emergency_stopped());
        assert!(mock.calls().contains(&DriverCall::Stop));

        let err = controller.move_to(Position::new(10.0, 10.0)).await.unwrap_err();
        assert!(matches!(err, ControllerError::EmergencyStopActive));

        // mock reports a static position, so the halt confirmation passes
        controller.reset_emergency_stop().await.unwrap();
        assert!(!controller.is_emergency_stopped());
        controller.move_to(Position::new(10.0, 10.0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_refused_while_disconnected() {
        let (controller, _mock) = connected_controller();
        controller.emergency_stop().await;

        let err = controller.reset_emergency_stop().await.unwrap_err();
        assert!(matches!(err, ControllerError::UnsafeToReset));
        assert!(controller.is_emergency_stopped());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (controller, mock) = connected_controller();
        controller.connect().await.unwrap();

        controller.stop().await.unwrap();
        let position = controller.get_current_position().await.unwrap();
        controller.stop().await.unwrap();
        assert!(controller
            .get_current_position()
            .await
            .unwrap()
            .within(&position, 1e-9));
        assert_eq!(
            mock.calls()
                .iter()
                .filter(|c| matches!(c, DriverCall::Stop))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_driver_failure_downgrades_state() {
        let (controller, mock) = connected_controller();
        controller.connect().await.unwrap();

        mock.fail_reads(true);
        let err = controller.get_current_position().await.unwrap_err();
        assert!(matches!(err, ControllerError::Driver(_)));
        assert_eq!(controller.connection_state().await, ConnectionState::Error);

        // fail fast until reconnection
        let err = controller.move_to(Position::new(10.0, 10.0)).await.unwrap_err();
        assert!(matches!(err, ControllerError::NotConnected));

        mock.fail_reads(false);
        controller.connect().await.unwrap();
        controller.move_to(Position::new(10.0, 10.0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_settle_timeout_halts_mount() {
        let (controller, mock) = connected_controller();
        controller.connect().await.unwrap();
        mock.hold_position(true); // mount never reaches the target
        mock.clear_calls();

        let err = controller
            .move_and_settle(Position::new(180.0, 45.0), 0.5, Duration::from_millis(60))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Timeout));
        assert!(mock.calls().contains(&DriverCall::Stop));
    }

    #[tokio::test]
    async fn test_settle_observes_emergency_stop() {
        let (controller, mock) = connected_controller();
        controller.connect().await.unwrap();
        mock.hold_position(true);

        let waiter = controller.clone();
        let wait = tokio::spawn(async move {
            waiter
                .move_and_settle(Position::new(180.0, 45.0), 0.5, Duration::from_secs(5))
                .await
        });

        sleep(Duration::from_millis(25)).await;
        controller.emergency_stop().await;

        let err = wait.await.unwrap().unwrap_err();
        assert!(matches!(err, ControllerError::EmergencyStopActive));
    }

    #[tokio::test]
    async fn test_set_calibration_persists() {
        let (controller, _mock) = connected_controller();
        let path = controller.inner.config.calibration_path.clone();
        std::fs::remove_file(&path).ok();

        let calibration = PositionCalibration {
            azimuth_offset_deg: 2.5,
            ..Default::default()
        };
        controller.set_calibration(calibration, true).await.unwrap();

        let loaded = mount_model::load_calibration(&path).unwrap();
        assert_eq!(loaded, calibration);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_simulated_mount_settles_within_tolerance() {
        let driver = SimulatedDriver::new(SimulatedDriverConfig {
            speed_multiplier: 360.0,
            ..Default::default()
        });
        let controller = AntennaController::new(
            Box::new(driver),
            PositionCalibration::default(),
            test_config(),
        )
        .unwrap();
        controller.connect().await.unwrap();

        let target = Position::new(180.0, 45.0);
        controller.slew_to(target, Duration::from_secs(5)).await.unwrap();

        let position = controller.get_current_position().await.unwrap();
        assert!(position.within(&target, DEFAULT_SETTLE_TOLERANCE_DEG));
    }
}
