//! Tracking Loop
//!
//! Cancellable periodic re-aiming of the mount against an externally
//! supplied ephemeris. Each tick queries the ephemeris for the target's
//! look angles and, while the target is visible, issues a fire-and-forget
//! move so the cadence never waits on mount arrival. Cancellation is
//! cooperative: no new driver command is issued after it is observed, and
//! one halt quiesces any outstanding motion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use mount_model::Position;

use crate::controller::{AntennaController, ConnectionState, ControllerError, Result};

/// Look angles of a tracked target at one instant. Elevation exactly at the
/// horizon counts as visible.
#[derive(Debug, Clone, Copy)]
pub struct TargetTrack {
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
    pub visible: bool,
}

#[derive(Error, Debug)]
#[error("ephemeris computation failed: {0}")]
pub struct EphemerisError(pub String);

/// Opaque, possibly slow, fallible source of target look angles. An
/// implementation carries its own observer location; the engine only maps
/// a target name and a timestamp to look angles.
#[async_trait]
pub trait EphemerisSource: Send + Sync {
    async fn look_angles(
        &self,
        target: &str,
        at: DateTime<Utc>,
    ) -> std::result::Result<TargetTrack, EphemerisError>;
}

/// Snapshot of the active (or most recently ended) tracking session.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingSession {
    pub target: String,
    pub update_interval_ms: u64,
    pub active: bool,
}

pub(crate) struct TrackingHandle {
    pub(crate) target: String,
    pub(crate) update_interval: Duration,
    pub(crate) active: Arc<AtomicBool>,
    cancel_tx: watch::Sender<bool>,
}

impl TrackingHandle {
    pub(crate) fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub(crate) fn session(&self) -> TrackingSession {
        TrackingSession {
            target: self.target.clone(),
            update_interval_ms: self.update_interval.as_millis() as u64,
            active: self.active.load(Ordering::SeqCst),
        }
    }
}

impl AntennaController {
    /// Begin a tracking session against `source`. Preconditions mirror
    /// [`move_to`](Self::move_to), plus at most one active session.
    pub async fn start_tracking(
        &self,
        target: impl Into<String>,
        source: Arc<dyn EphemerisSource>,
        update_interval: Duration,
    ) -> Result<()> {
        let target = target.into();

        if self.is_emergency_stopped() {
            return Err(ControllerError::EmergencyStopActive);
        }
        if self.connection_state().await != ConnectionState::Connected {
            return Err(ControllerError::NotConnected);
        }

        let mut slot = self.inner.tracking.lock().await;
        if let Some(handle) = slot.as_ref() {
            if handle.active.load(Ordering::SeqCst) {
                return Err(ControllerError::AlreadyTracking);
            }
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let active = Arc::new(AtomicBool::new(true));
        *slot = Some(TrackingHandle {
            target: target.clone(),
            update_interval,
            active: active.clone(),
            cancel_tx,
        });
        drop(slot);

        info!(%target, ?update_interval, "tracking session started");
        tokio::spawn(run_tracking(
            self.clone(),
            source,
            target,
            update_interval,
            cancel_rx,
            active,
        ));
        Ok(())
    }

    /// Cancel the active tracking session and quiesce any outstanding
    /// motion. Idempotent.
    pub async fn stop_tracking(&self) {
        if self.cancel_tracking().await {
            if let Err(e) = self.halt_driver().await {
                warn!(error = %e, "halt after tracking stop failed");
            }
        }
    }
}

async fn run_tracking(
    controller: AntennaController,
    source: Arc<dyn EphemerisSource>,
    target: String,
    update_interval: Duration,
    mut cancel_rx: watch::Receiver<bool>,
    active: Arc<AtomicBool>,
) {
    let mut ticker = interval(update_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel_rx.changed() => break,
        }
        if *cancel_rx.borrow() {
            break;
        }

        let track = match source.look_angles(&target, Utc::now()).await {
            Ok(track) => track,
            Err(e) => {
                // one lost tick, the session continues
                warn!(%target, error = %e, "ephemeris tick failed");
                continue;
            }
        };

        if !track.visible {
            debug!(%target, "target not visible, holding position");
            continue;
        }

        let aim = Position::new(track.azimuth_deg, track.elevation_deg);
        match controller.move_to(aim).await {
            Ok(()) => debug!(%target, %aim, "tracking move issued"),
            Err(e @ (ControllerError::EmergencyStopActive | ControllerError::NotConnected)) => {
                warn!(%target, error = %e, "tracking session ended");
                break;
            }
            Err(e) => warn!(%target, error = %e, "tracking move rejected"),
        }
    }

    active.store(false, Ordering::SeqCst);
    debug!(%target, "tracking task exited");
}
