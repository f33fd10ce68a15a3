//! TCP transport: owns the engine subprocess and the loopback socket it talks on.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::socket_config::SocketConfig;
use super::types::{
    CancelToken, LaunchSpec, Transport, TransportError, TransportSettings, TransportState,
};
use crate::protocol::{CodecError, Flag, Packet};

/// Engine stdout is captured here, relative to the working directory.
pub const ENGINE_STDOUT_LOG: &str = "engine.stdout.log";
/// Engine stderr is captured here, relative to the working directory.
pub const ENGINE_STDERR_LOG: &str = "engine.stderr.log";

/// Longest packet line accepted from the engine, newline included.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// Transport that launches the engine as a child process and exchanges packets
/// with it over one loopback TCP connection.
///
/// Blocked waits poll at `poll_interval` so a [`CancelToken`] can interrupt
/// them. Dropping the session stops it.
pub struct TransportSession {
    settings: TransportSettings,
    state: TransportState,
    cancel: CancelToken,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    child: Option<Child>,
    reader: Option<BufReader<TcpStream>>,
    writer: Option<TcpStream>,
    /// Bytes of a packet line received so far; survives poll timeouts.
    line: Vec<u8>,
}

impl TransportSession {
    /// Creates an idle session; nothing is bound or launched until [`Transport::start`].
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            state: TransportState::NotStarted,
            cancel: CancelToken::new(),
            listener: None,
            local_addr: None,
            child: None,
            reader: None,
            writer: None,
            line: Vec::new(),
        }
    }

    /// Address the session listens on, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Process id of the engine, while it is owned by this session.
    pub fn engine_pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    fn poll_interval(&self) -> Duration {
        self.settings.poll_interval.max(Duration::from_millis(1))
    }

    fn child_exit_status(&mut self) -> Option<String> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(err) => {
                debug!(error = %err, "could not poll engine status");
                None
            }
        }
    }

    fn attach(&mut self, stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(self.poll_interval()))?;
        let writer = stream.try_clone()?;
        self.reader = Some(BufReader::new(stream));
        self.writer = Some(writer);
        self.line.clear();
        self.listener = None;
        self.state = TransportState::Connected;
        Ok(())
    }
}

impl Transport for TransportSession {
    fn start(&mut self, launch: &LaunchSpec) -> Result<(), TransportError> {
        if self.state != TransportState::NotStarted {
            return Err(TransportError::InvalidState { state: self.state });
        }
        let launch_error = |source: io::Error| TransportError::Launch {
            executable: launch.executable.clone(),
            source,
        };

        if !launch.working_dir.is_dir() {
            return Err(launch_error(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "working directory `{}` does not exist",
                    launch.working_dir.display()
                ),
            )));
        }

        let listener = TcpListener::bind((self.settings.host.as_str(), self.settings.port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        // The engine reads this at launch, so it must exist before the spawn.
        SocketConfig::from_addr(addr)
            .write_to(&launch.working_dir)
            .map_err(launch_error)?;

        let stdout = File::create(launch.working_dir.join(ENGINE_STDOUT_LOG)).map_err(launch_error)?;
        let stderr = File::create(launch.working_dir.join(ENGINE_STDERR_LOG)).map_err(launch_error)?;
        let child = Command::new(&launch.executable)
            .args(&launch.args)
            .current_dir(&launch.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(launch_error)?;

        info!(
            executable = %launch.executable,
            pid = child.id(),
            addr = %addr,
            "engine launched"
        );
        self.listener = Some(listener);
        self.local_addr = Some(addr);
        self.child = Some(child);
        self.state = TransportState::Listening;
        Ok(())
    }

    fn accept_connection(&mut self) -> Result<(), TransportError> {
        if self.state != TransportState::Listening {
            return Err(TransportError::InvalidState { state: self.state });
        }
        let timeout = self.settings.accept_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => return Err(TransportError::InvalidState { state: self.state }),
            };
            match accepted {
                Ok((stream, peer)) => {
                    self.attach(stream)?;
                    debug!(peer = %peer, "engine connected");
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }

            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            if let Some(status) = self.child_exit_status() {
                return Err(TransportError::EngineExited { status });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::AcceptTimeout(timeout));
            }
            thread::sleep(self.poll_interval().min(deadline - now));
        }
    }

    fn read_packet(&mut self) -> Result<Packet, TransportError> {
        let state = self.state;
        let reader = match (&mut self.reader, state) {
            (Some(reader), TransportState::Connected) => reader,
            _ => return Err(TransportError::NotConnected { state }),
        };
        let timeout = self.settings.read_timeout;
        let deadline = Instant::now() + timeout;

        // Checked on every chunk: an engine trickling bytes without a newline
        // must still hit the deadline and observe a stop.
        loop {
            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::ReadTimeout(timeout));
            }

            let available = match reader.fill_buf() {
                Ok([]) => return Err(TransportError::Closed),
                Ok(bytes) => bytes,
                Err(err) if is_poll_timeout(&err) => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if is_disconnect(&err) => return Err(TransportError::Closed),
                Err(err) => return Err(err.into()),
            };
            let (chunk, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (&available[..=end], true),
                None => (available, false),
            };
            let used = chunk.len();
            if self.line.len() + used > MAX_LINE_BYTES {
                reader.consume(used);
                self.line.clear();
                return Err(CodecError::Malformed {
                    reason: format!("line exceeds {MAX_LINE_BYTES} bytes without a line break"),
                }
                .into());
            }
            self.line.extend_from_slice(chunk);
            reader.consume(used);

            if complete {
                let decoded = Packet::decode(&self.line);
                self.line.clear();
                return Ok(decoded?);
            }
        }
    }

    fn write_packet(&mut self, packet: &Packet) -> Result<(), TransportError> {
        let state = self.state;
        let writer = match (&mut self.writer, state) {
            (Some(writer), TransportState::Connected) => writer,
            _ => return Err(TransportError::NotConnected { state }),
        };
        writer
            .write_all(&packet.encode())
            .and_then(|()| writer.flush())
            .map_err(|err| {
                if is_disconnect(&err) {
                    TransportError::Closed
                } else {
                    TransportError::Io(err)
                }
            })
    }

    fn stop(&mut self, send_finish: bool) {
        if self.state == TransportState::Stopped {
            return;
        }
        if send_finish && self.state == TransportState::Connected {
            if let Err(err) = self.write_packet(&Packet::signal(Flag::Finish)) {
                debug!(error = %err, "finish signal not delivered");
            }
        }

        if let Some(writer) = self.writer.take() {
            let _ = writer.shutdown(Shutdown::Both);
        }
        self.reader = None;
        self.listener = None;
        self.line.clear();
        if let Some(mut child) = self.child.take() {
            terminate(&mut child);
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

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.stop(false);
    }
}

fn terminate(child: &mut Child) {
    let pid = child.id();
    match child.try_wait() {
        Ok(Some(status)) => debug!(pid, status = %status, "engine already exited"),
        Ok(None) => {
            if let Err(err) = child.kill() {
                warn!(pid, error = %err, "failed to kill engine");
            }
            match child.wait() {
                Ok(status) => debug!(pid, status = %status, "engine terminated"),
                Err(err) => warn!(pid, error = %err, "failed to reap engine"),
            }
        }
        Err(err) => warn!(pid, error = %err, "failed to query engine status"),
    }
}

fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}
