//! In-memory engine double shared by the run and dispatch unit tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::Model;
use crate::points::{PointTable, VariableDeclaration};
use crate::protocol::{Flag, Packet};
use crate::transport::{CancelToken, LaunchSpec, Transport, TransportError, TransportState};

/// Plays back canned engine replies and records what the controller wrote.
pub(crate) struct ScriptedTransport {
    state: TransportState,
    replies: VecDeque<Vec<u8>>,
    written: Vec<Packet>,
    fail_accept: bool,
    block_when_empty: bool,
    finish_sent: bool,
    cancel: CancelToken,
}

impl ScriptedTransport {
    pub(crate) fn replying(replies: &[&str]) -> Self {
        Self {
            state: TransportState::NotStarted,
            replies: replies.iter().map(|r| r.as_bytes().to_vec()).collect(),
            written: Vec::new(),
            fail_accept: false,
            block_when_empty: false,
            finish_sent: false,
            cancel: CancelToken::new(),
        }
    }

    /// Accept fails with a timeout instead of connecting.
    pub(crate) fn failing_accept(mut self) -> Self {
        self.fail_accept = true;
        self
    }

    /// Reads past the last reply block until cancelled, like a stalled engine.
    pub(crate) fn blocking_when_empty(mut self) -> Self {
        self.block_when_empty = true;
        self
    }

    pub(crate) fn written(&self) -> Vec<Packet> {
        self.written.clone()
    }

    pub(crate) fn finish_sent(&self) -> bool {
        self.finish_sent
    }
}

impl Transport for ScriptedTransport {
    fn start(&mut self, _launch: &LaunchSpec) -> Result<(), TransportError> {
        if self.state != TransportState::NotStarted {
            return Err(TransportError::InvalidState { state: self.state });
        }
        self.state = TransportState::Listening;
        Ok(())
    }

    fn accept_connection(&mut self) -> Result<(), TransportError> {
        if self.state != TransportState::Listening {
            return Err(TransportError::InvalidState { state: self.state });
        }
        if self.fail_accept {
            return Err(TransportError::AcceptTimeout(Duration::from_millis(10)));
        }
        self.state = TransportState::Connected;
        Ok(())
    }

    fn read_packet(&mut self) -> Result<Packet, TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::NotConnected { state: self.state });
        }
        match self.replies.pop_front() {
            Some(bytes) => Ok(Packet::decode(&bytes)?),
            None if self.block_when_empty => {
                while !self.cancel.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(TransportError::Cancelled)
            }
            None => Err(TransportError::Closed),
        }
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        if self.state != TransportState::Connected {
            return Err(TransportError::NotConnected { state: self.state });
        }
        self.written.push(packet.clone());
        Ok(())
    }

    fn stop(&mut self, send_finish: bool) {
        if send_finish && self.state == TransportState::Connected {
            self.written.push(Packet::signal(Flag::Finish));
            self.finish_sent = true;
        }
        self.state = TransportState::Stopped;
    }

    fn state(&self) -> TransportState {
        self.state
    }

    fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

/// Two outputs (`T1`, `OAT`) and two inputs (`u1`, and `sp` with an enable
/// companion), giving input slots `[u1, sp, sp_enable]`.
pub(crate) fn sample_model() -> Model {
    let variables = VariableDeclaration::default()
        .with_output("Zone Temp", "EnergyPlus")
        .with_input("U1")
        .with_output("Site Outdoor Air Drybulb Temperature", "Environment")
        .with_input("SP")
        .with_input("SP_Enable");
    let points = PointTable::default()
        .with_output("T1", "Zone Temp", "EnergyPlus")
        .with_output("OAT", "Site Outdoor Air Drybulb Temperature", "Environment")
        .with_input("u1", "U1", None)
        .with_input("sp", "SP", Some("SP_Enable"));
    let launch = LaunchSpec {
        executable: "energyplus".to_string(),
        args: Vec::new(),
        working_dir: PathBuf::from("."),
    };
    Model::new("sample", launch, variables, points)
}
