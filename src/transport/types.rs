//! Common types and the trait every transport implements.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::protocol::{CodecError, Packet};

/// How to launch the engine subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute.
    pub executable: String,
    /// Fixed argument list (model files etc.).
    pub args: Vec<String>,
    /// Directory the engine runs in; receives the socket configuration file.
    pub working_dir: PathBuf,
}

/// Socket and timing parameters for a transport session.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    /// Loopback address to listen on.
    pub host: String,
    /// Port to listen on; `0` picks an ephemeral port.
    pub port: u16,
    /// Upper bound on waiting for the engine to connect.
    pub accept_timeout: Duration,
    /// Upper bound on waiting for one packet from a connected engine.
    pub read_timeout: Duration,
    /// Granularity at which blocked waits check for cancellation.
    pub poll_interval: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            accept_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Transport lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    NotStarted,
    Listening,
    Connected,
    Stopped,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::Listening => "listening",
            Self::Connected => "connected",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared flag that interrupts blocked accepts, reads and pacing sleeps.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleeps for `total`, waking every `slice` to check the flag.
    ///
    /// Returns `false` if the token was cancelled before the sleep finished.
    pub fn sleep(&self, total: Duration, slice: Duration) -> bool {
        let slice = slice.max(Duration::from_millis(1));
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let nap = remaining.min(slice);
            std::thread::sleep(nap);
            remaining = remaining.saturating_sub(nap);
        }
        !self.is_cancelled()
    }
}

/// Transport failures. `Cancelled` ends a run as stopped; the rest fail it.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to launch `{executable}`: {source}")]
    Launch {
        executable: String,
        #[source]
        source: io::Error,
    },
    #[error("engine did not connect within {0:?}")]
    AcceptTimeout(Duration),
    #[error("engine sent no packet within {0:?}")]
    ReadTimeout(Duration),
    #[error("operation requires a connected transport, state is {state}")]
    NotConnected { state: TransportState },
    #[error("operation not valid while transport is {state}")]
    InvalidState { state: TransportState },
    #[error("engine closed the connection")]
    Closed,
    #[error("engine exited before connecting ({status})")]
    EngineExited { status: String },
    #[error("wait cancelled by stop request")]
    Cancelled,
    #[error("protocol error: {0}")]
    Codec(#[from] CodecError),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// Trait implemented by everything that can carry packets to and from an engine.
///
/// The run controller is generic over this trait; [`super::TransportSession`]
/// is the TCP implementation and tests substitute scripted doubles.
pub trait Transport: Send {
    /// Launches the engine and begins listening for it.
    ///
    /// # Errors
    ///
    /// [`TransportError::Launch`] if the engine cannot be spawned or the
    /// socket configuration cannot be written.
    fn start(&mut self, launch: &LaunchSpec) -> Result<(), TransportError>;

    /// Waits for the engine to connect.
    ///
    /// # Errors
    ///
    /// [`TransportError::AcceptTimeout`] on timeout; the transport stays listening.
    fn accept_connection(&mut self) -> Result<(), TransportError>;

    /// Reads one framed packet.
    fn read_packet(&mut self) -> Result<Packet, TransportError>;

    /// Writes one framed packet.
    fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError>;

    /// Closes the socket and terminates the engine. Idempotent.
    ///
    /// With `send_finish`, a Finish packet is attempted first; its failure is ignored.
    fn stop(&mut self, send_finish: bool);

    fn state(&self) -> TransportState;

    /// Token that interrupts this transport's blocked waits.
    fn cancel_token(&self) -> CancelToken;
}
