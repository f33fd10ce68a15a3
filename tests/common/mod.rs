//! Shared test fixtures for integration tests.
//!
//! The engine subprocess is a placeholder (`sleep`); the co-simulation side
//! of the engine is played by a peer thread that finds the listening port
//! through the socket configuration file, exactly as a real engine would.

#![allow(dead_code)]

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tempfile::TempDir;

use cosim_ctl::config::CosimConfig;
use cosim_ctl::model::Model;
use cosim_ctl::protocol::Packet;
use cosim_ctl::run::{ClockMode, RunParams};
use cosim_ctl::transport::{SocketConfig, TransportSettings};

/// Two outputs and one input with an enable companion.
pub const VARIABLES_TOML: &str = r#"
[[variable]]
role = "output"
type = "Zone Mean Air Temperature"
name = "CORE_ZN"

[[variable]]
role = "input"
name = "CORE_ZN_T_SP"

[[variable]]
role = "input"
name = "CORE_ZN_T_SP_Enable"

[[variable]]
role = "output"
type = "Site Outdoor Air Drybulb Temperature"
name = "Environment"
"#;

pub const POINTS_JSON: &str = r#"[
    {"id": "zone_temp", "output": {"type": "Zone Mean Air Temperature", "name": "CORE_ZN"}},
    {"id": "oat", "output": {"type": "Site Outdoor Air Drybulb Temperature", "name": "Environment"}},
    {"id": "zone_sp", "input": {"name": "CORE_ZN_T_SP", "enable": "CORE_ZN_T_SP_Enable"}}
]"#;

/// Temporary model directory holding the descriptor files.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("variables.toml"), VARIABLES_TOML).expect("write declaration");
        fs::write(dir.path().join("points.json"), POINTS_JSON).expect("write point table");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Config pointing at this fixture with `sleep 30` standing in for the engine.
    pub fn config(&self, clock: ClockMode) -> CosimConfig {
        let toml = format!(
            r#"
[model]
name = "small-office"
variables = "variables.toml"
points = "points.json"
executable = "sleep"
args = ["30"]
working_dir = "."

[transport]
accept_timeout_ms = 5000
read_timeout_ms = 5000
poll_interval_ms = 10

[run]
clock = "{clock}"
start_datetime = "2019-01-01T00:00:00"
end_datetime = "2019-01-02T00:00:00"
timescale = 1000000.0

[dispatcher]
max_sessions = 2
"#
        );
        let path = self.path().join("cosim.toml");
        fs::write(&path, toml).expect("write config");
        CosimConfig::from_toml_file(&path).expect("config should load")
    }

    pub fn model(&self, config: &CosimConfig) -> Arc<Model> {
        Arc::new(Model::load(&config.model).expect("model should load"))
    }

    pub fn socket_config_path(&self) -> PathBuf {
        self.path().join("socket.cfg")
    }
}

pub fn fast_settings() -> TransportSettings {
    TransportSettings {
        accept_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        ..TransportSettings::default()
    }
}

pub fn params(clock_mode: ClockMode) -> RunParams {
    let day = NaiveDate::from_ymd_opt(2019, 1, 1).expect("valid date");
    RunParams {
        clock_mode,
        start_datetime: day.and_hms_opt(0, 0, 0).expect("valid time"),
        end_datetime: day.and_hms_opt(23, 0, 0).expect("valid time"),
        timescale: 1_000_000.0,
    }
}

/// Engine side of the socket.
pub struct EnginePeer {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl EnginePeer {
    /// Waits for the controller's socket configuration in `dir`, then connects.
    pub fn connect(dir: &Path) -> Self {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Ok(cfg) = SocketConfig::read_from(dir) {
                if let Ok(stream) = TcpStream::connect((cfg.hostname.as_str(), cfg.port)) {
                    let writer = stream.try_clone().expect("clone stream");
                    return Self {
                        reader: BufReader::new(stream),
                        writer,
                    };
                }
            }
            assert!(Instant::now() < deadline, "controller never listened");
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Next controller packet, or `None` once the controller hung up.
    pub fn recv(&mut self) -> Option<Packet> {
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(Packet::decode(&line).expect("controller sent a valid packet")),
        }
    }

    pub fn send(&mut self, wire: &str) {
        self.writer.write_all(wire.as_bytes()).expect("send to controller");
    }

    /// Replies to one controller packet with outputs `[zone_temp, oat]`.
    pub fn reply(&mut self, sim_time: f64, zone_temp: f64, oat: f64) {
        let packet = Packet::communicate(sim_time, vec![zone_temp, oat]);
        self.writer.write_all(&packet.encode()).expect("send to controller");
    }
}

/// Runs `script` as the engine in a background thread.
pub fn spawn_engine(
    dir: &Path,
    script: impl FnOnce(EnginePeer) + Send + 'static,
) -> JoinHandle<()> {
    let dir = dir.to_path_buf();
    thread::spawn(move || script(EnginePeer::connect(&dir)))
}
