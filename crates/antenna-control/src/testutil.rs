//! Shared test double: a scriptable motor driver that records every call.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mount_model::Position;

use crate::driver::{DriverError, MotorDriver, Result};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DriverCall {
    Connect,
    Disconnect,
    Read,
    MoveTo(Position),
    Stop,
}

#[derive(Debug)]
struct MockState {
    connected: bool,
    position: Position,
    calls: Vec<DriverCall>,
    fail_reads: bool,
    /// When set, `move_to` is accepted but the reported position never
    /// changes, a mount that does not arrive.
    hold_position: bool,
    /// When set, `connect` parks this long before completing, so tests can
    /// observe the mid-transition window.
    connect_delay: Option<Duration>,
}

/// Clonable handle; the controller owns one clone, the test inspects the
/// other.
#[derive(Debug, Clone)]
pub(crate) struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub(crate) fn new(position: Position) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                connected: false,
                position,
                calls: Vec::new(),
                fail_reads: false,
                hold_position: false,
                connect_delay: None,
            })),
        }
    }

    pub(crate) fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub(crate) fn hold_position(&self, hold: bool) {
        self.state.lock().unwrap().hold_position = hold;
    }

    pub(crate) fn delay_connect(&self, delay: Duration) {
        self.state.lock().unwrap().connect_delay = Some(delay);
    }

    pub(crate) fn move_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| matches!(c, DriverCall::MoveTo(_)))
            .count()
    }
}

#[async_trait]
impl MotorDriver for MockDriver {
    async fn connect(&mut self) -> Result<()> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(DriverCall::Connect);
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DriverCall::Disconnect);
        state.connected = false;
    }

    async fn read_position(&mut self) -> Result<Position> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DriverCall::Read);
        if state.fail_reads {
            return Err(DriverError::Communication("scripted read failure".into()));
        }
        Ok(state.position)
    }

    async fn move_to(&mut self, raw: Position) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DriverCall::MoveTo(raw));
        if !state.hold_position {
            // instant arrival keeps settle tests fast
            state.position = raw;
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(DriverCall::Stop);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }
}
