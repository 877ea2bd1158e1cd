//! Hamlib `rotctl` Hardware Driver
//!
//! Drives a physical rotator through the Hamlib `rotctl` command-line
//! program (SPID MD-01/02/03 class controllers on a serial line). Each
//! operation spawns one short-lived `rotctl` process, writes a single
//! command verb on stdin (`p` query, `P az el` set, `S` halt) and parses
//! the textual reply. Every round-trip is bounded by the configured
//! timeout; a failed call surfaces to the caller rather than being
//! retried, so persistent hardware faults are never masked.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, info};

use mount_model::Position;

use crate::driver::{DriverError, MotorDriver, Result};

/// Hamlib rotator model id for the SPID MD-01/02/03 family.
const DEFAULT_ROTCTL_MODEL: &str = "903";

#[derive(Debug, Clone)]
pub struct RotctlConfig {
    /// Program name or path of the rotctl binary.
    pub program: String,
    /// Hamlib rotator model id.
    pub model: String,
    /// Serial device the rotator is attached to.
    pub port: String,
    pub baud_rate: u32,
    /// Bound on every process round-trip, handshake included.
    pub timeout: Duration,
}

impl RotctlConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            program: "rotctl".to_string(),
            model: DEFAULT_ROTCTL_MODEL.to_string(),
            port: port.into(),
            baud_rate: 115_200,
            timeout: Duration::from_secs(5),
        }
    }
}

/// Motor driver backed by the external `rotctl` process.
pub struct RotctlDriver {
    config: RotctlConfig,
    connected: bool,
}

impl RotctlDriver {
    pub fn new(config: RotctlConfig) -> Self {
        Self {
            config,
            connected: false,
        }
    }

    /// Run one rotctl invocation: spawn, write `input` on stdin, collect the
    /// reply. The child is killed if the round-trip outlives the timeout.
    async fn exchange(&self, input: &str) -> Result<String> {
        let mut child = Command::new(&self.config.program)
            .args([
                "-m",
                &self.config.model,
                "-r",
                &self.config.port,
                "-s",
                &self.config.baud_rate.to_string(),
                "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DriverError::Communication(format!("failed to spawn {}: {e}", self.config.program))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::Communication("rotctl stdin unavailable".to_string()))?;
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| DriverError::Communication(format!("rotctl stdin write: {e}")))?;
        drop(stdin);

        let output = time::timeout(self.config.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                DriverError::Communication(format!(
                    "rotctl round-trip exceeded {:?}",
                    self.config.timeout
                ))
            })?
            .map_err(|e| DriverError::Communication(format!("rotctl wait: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::Communication(format!(
                "rotctl exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Check the rotctl binary is runnable at all.
    async fn probe_program(&self) -> Result<()> {
        let status = time::timeout(
            self.config.timeout,
            Command::new(&self.config.program)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await
        .map_err(|_| DriverError::Connection("rotctl version probe timed out".to_string()))?
        .map_err(|e| DriverError::Connection(format!("rotctl not available: {e}")))?;

        if !status.success() {
            return Err(DriverError::Connection(format!(
                "rotctl version probe exited with {status}"
            )));
        }
        Ok(())
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
impl MotorDriver for RotctlDriver {
    async fn connect(&mut self) -> Result<()> {
        self.probe_program().await?;

        // The handshake is an initial position query over the real channel.
        let reply = self
            .exchange("p\n")
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;
        let position = parse_position_reply(&reply)
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        self.connected = true;
        info!(
            port = %self.config.port,
            baud = self.config.baud_rate,
            %position,
            "rotctl channel open"
        );
        Ok(())
    }

    async fn disconnect(&mut self) {
        // rotctl holds no persistent session; forgetting the port suffices.
        self.connected = false;
        info!(port = %self.config.port, "rotctl channel released");
    }

    async fn read_position(&mut self) -> Result<Position> {
        self.require_connected()?;
        let reply = self.exchange("p\n").await?;
        let position = parse_position_reply(&reply)?;
        debug!(%position, "rotctl position read");
        Ok(position)
    }

    async fn move_to(&mut self, raw: Position) -> Result<()> {
        self.require_connected()?;
        let raw = raw.normalized();
        let command = format!("P {:.1} {:.1}\n", raw.azimuth_deg, raw.elevation_deg);
        self.exchange(&command).await?;
        debug!(%raw, "rotctl move accepted");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        // A halt is attempted even without an open session: every command
        // spawns its own rotctl process, so no handshake is required and a
        // disconnected mount must still be haltable.
        self.exchange("S\n").await?;
        info!("rotctl halt issued");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Parse a rotctl position reply into degrees.
///
/// Replies normally carry one bare number per line, preceded by an echo of
/// the command. Some firmware/rotctl combinations label the values instead,
/// so a whitespace-token scan of the whole reply is the fallback.
fn parse_position_reply(reply: &str) -> Result<Position> {
    let mut values: Vec<f64> = Vec::new();
    for line in reply.lines() {
        let line = line.trim();
        if line.is_empty() || line == "p" {
            continue;
        }
        if let Some(rest) = line.strip_prefix("p ") {
            if let Ok(v) = rest.trim().parse::<f64>() {
                values.push(v);
            }
            continue;
        }
        if let Ok(v) = line.parse::<f64>() {
            values.push(v);
        }
    }

    if values.len() < 2 {
        values = reply
            .split_whitespace()
            .filter_map(|token| token.trim_end_matches(':').parse::<f64>().ok())
            .collect();
    }

    match (values.first(), values.get(1)) {
        (Some(&az), Some(&el)) => Ok(Position::new(az, el)),
        _ => Err(DriverError::Communication(format!(
            "incomplete position reply: {reply:?}"
        ))),
    }
}
