//! TOML-based controller configuration.

use std::error::Error;
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::run::{ClockMode, RunParams};
use crate::transport::TransportSettings;

/// Top-level configuration parsed from TOML.
///
/// Every section has defaults; load from TOML with
/// [`CosimConfig::from_toml_file`] and check with [`CosimConfig::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CosimConfig {
    /// Engine launch and descriptor files.
    #[serde(default)]
    pub model: ModelConfig,
    /// Socket and timeout settings.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Run parameters passed to `start`.
    #[serde(default)]
    pub run: RunConfig,
    /// Session registry limits.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// Engine launch and descriptor files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Display name of the model.
    pub name: String,
    /// Variable declaration (TOML, `[[variable]]` entries).
    pub variables: PathBuf,
    /// Point table (JSON array).
    pub points: PathBuf,
    /// Engine executable.
    pub executable: String,
    /// Fixed engine argument list.
    pub args: Vec<String>,
    /// Engine working directory; receives `socket.cfg` and the engine logs.
    pub working_dir: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "model".to_string(),
            variables: PathBuf::from("variables.toml"),
            points: PathBuf::from("points.json"),
            executable: "energyplus".to_string(),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
        }
    }
}

impl ModelConfig {
    /// Resolves relative paths against `base` (the config file's directory).
    pub fn rebase(&mut self, base: &Path) {
        for path in [&mut self.variables, &mut self.points, &mut self.working_dir] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Socket and timeout settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    /// Listen address (must be loopback).
    pub host: String,
    /// Listen port; 0 picks an ephemeral port.
    pub port: u16,
    /// Wait for the engine to connect (ms).
    pub accept_timeout_ms: u64,
    /// Wait for one engine packet (ms).
    pub read_timeout_ms: u64,
    /// Cancellation check interval while blocked (ms).
    pub poll_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            accept_timeout_ms: 30_000,
            read_timeout_ms: 60_000,
            poll_interval_ms: 50,
        }
    }
}

/// Run parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// `"external"` or `"internal"`.
    pub clock: ClockMode,
    /// Calendar time of simulation time zero (`YYYY-MM-DDTHH:MM:SS`).
    pub start_datetime: NaiveDateTime,
    /// Internal-clock runs stop here.
    pub end_datetime: NaiveDateTime,
    /// Simulated seconds per wall-clock second.
    pub timescale: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        let midnight = |day| {
            NaiveDate::from_ymd_opt(2019, 1, day)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default()
        };
        Self {
            clock: ClockMode::External,
            start_datetime: midnight(1),
            end_datetime: midnight(2),
            timescale: 60.0,
        }
    }
}

/// Session registry limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Maximum number of live (non-terminal) sessions.
    pub max_sessions: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { max_sessions: 4 }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"transport.read_timeout_ms"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl Error for ConfigError {}

impl CosimConfig {
    /// Parses a configuration file. Relative model paths are resolved
    /// against the file's directory.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "config".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let Some(dir) = path.parent() {
            config.model.rebase(dir);
        }
        Ok(config)
    }

    /// Parses a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    pub fn transport_settings(&self) -> TransportSettings {
        let t = &self.transport;
        TransportSettings {
            host: t.host.clone(),
            port: t.port,
            accept_timeout: Duration::from_millis(t.accept_timeout_ms),
            read_timeout: Duration::from_millis(t.read_timeout_ms),
            poll_interval: Duration::from_millis(t.poll_interval_ms),
        }
    }

    pub fn run_params(&self) -> RunParams {
        RunParams {
            clock_mode: self.run.clock,
            start_datetime: self.run.start_datetime,
            end_datetime: self.run.end_datetime,
            timescale: self.run.timescale,
        }
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut reject = |field: &str, message: String| {
            errors.push(ConfigError {
                field: field.to_string(),
                message,
            });
        };

        let m = &self.model;
        if m.executable.trim().is_empty() {
            reject("model.executable", "must not be empty".into());
        }
        if m.name.trim().is_empty() {
            reject("model.name", "must not be empty".into());
        }

        let t = &self.transport;
        if !is_loopback(&t.host) {
            reject(
                "transport.host",
                format!("must be a loopback address, got \"{}\"", t.host),
            );
        }
        if t.accept_timeout_ms == 0 {
            reject("transport.accept_timeout_ms", "must be > 0".into());
        }
        if t.read_timeout_ms == 0 {
            reject("transport.read_timeout_ms", "must be > 0".into());
        }
        if t.poll_interval_ms == 0 {
            reject("transport.poll_interval_ms", "must be > 0".into());
        } else if t.poll_interval_ms > t.accept_timeout_ms || t.poll_interval_ms > t.read_timeout_ms {
            reject(
                "transport.poll_interval_ms",
                "must be <= transport.accept_timeout_ms and transport.read_timeout_ms".into(),
            );
        }

        let r = &self.run;
        if r.end_datetime <= r.start_datetime {
            reject("run.end_datetime", "must be after run.start_datetime".into());
        }
        if !r.timescale.is_finite() || r.timescale <= 0.0 {
            reject("run.timescale", "must be > 0".into());
        }

        if self.dispatcher.max_sessions == 0 {
            reject("dispatcher.max_sessions", "must be > 0".into());
        }

        errors
    }
}

fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_valid() {
        let cfg = CosimConfig::default();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "defaults should be valid: {errors:?}");
    }

    #[test]
    fn valid_toml_parses() {
        let toml = r#"
[model]
name = "small-office"
variables = "model/variables.toml"
points = "model/points.json"
executable = "/usr/local/bin/energyplus"
args = ["-w", "weather.epw", "in.idf"]
working_dir = "run"

[transport]
host = "127.0.0.1"
port = 40123
accept_timeout_ms = 5000
read_timeout_ms = 20000
poll_interval_ms = 25

[run]
clock = "internal"
start_datetime = "2019-07-01T00:00:00"
end_datetime = "2019-07-08T00:00:00"
timescale = 3600.0

[dispatcher]
max_sessions = 8
"#;
        let cfg = CosimConfig::from_toml_str(toml);
        assert!(cfg.is_ok(), "valid TOML should parse: {:?}", cfg.err());
        let cfg = cfg.ok();
        assert_eq!(cfg.as_ref().map(|c| c.run.clock), Some(ClockMode::Internal));
        assert_eq!(cfg.as_ref().map(|c| c.model.args.len()), Some(3));
        assert_eq!(cfg.as_ref().map(|c| c.dispatcher.max_sessions), Some(8));
        assert_eq!(
            cfg.as_ref().map(|c| c.transport_settings().read_timeout),
            Some(Duration::from_secs(20))
        );
        assert!(cfg.map(|c| c.validate().is_empty()).unwrap_or(false));
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[transport]
port = 4000
bogus_field = true
"#;
        assert!(CosimConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn unknown_clock_is_rejected() {
        let toml = r#"
[run]
clock = "wall"
"#;
        assert!(CosimConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[transport]
port = 4000
"#;
        let cfg = CosimConfig::from_toml_str(toml).ok();
        assert_eq!(cfg.as_ref().map(|c| c.transport.port), Some(4000));
        assert_eq!(cfg.as_ref().map(|c| c.transport.poll_interval_ms), Some(50));
        assert_eq!(cfg.as_ref().map(|c| c.run.clock), Some(ClockMode::External));
    }

    #[test]
    fn validation_catches_remote_host() {
        let mut cfg = CosimConfig::default();
        cfg.transport.host = "10.0.0.7".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "transport.host"));

        cfg.transport.host = "localhost".to_string();
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn validation_catches_zero_timeouts() {
        let mut cfg = CosimConfig::default();
        cfg.transport.accept_timeout_ms = 0;
        cfg.transport.read_timeout_ms = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "transport.accept_timeout_ms"));
        assert!(errors.iter().any(|e| e.field == "transport.read_timeout_ms"));
    }

    #[test]
    fn validation_catches_coarse_poll_interval() {
        let mut cfg = CosimConfig::default();
        cfg.transport.poll_interval_ms = cfg.transport.read_timeout_ms + 1;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "transport.poll_interval_ms"));
    }

    #[test]
    fn validation_catches_inverted_window() {
        let mut cfg = CosimConfig::default();
        cfg.run.end_datetime = cfg.run.start_datetime;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "run.end_datetime"));
    }

    #[test]
    fn validation_catches_bad_timescale_and_capacity() {
        let mut cfg = CosimConfig::default();
        cfg.run.timescale = 0.0;
        cfg.dispatcher.max_sessions = 0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "run.timescale"));
        assert!(errors.iter().any(|e| e.field == "dispatcher.max_sessions"));
    }

    #[test]
    fn validation_catches_empty_executable() {
        let mut cfg = CosimConfig::default();
        cfg.model.executable = " ".to_string();
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "model.executable"));
    }

    #[test]
    fn file_paths_are_rebased_on_config_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cosim.toml");
        fs::write(
            &path,
            "[model]\nvariables = \"vars.toml\"\npoints = \"/abs/points.json\"\n",
        )
        .expect("write config");
        let cfg = CosimConfig::from_toml_file(&path).expect("config should load");
        assert_eq!(cfg.model.variables, dir.path().join("vars.toml"));
        assert_eq!(cfg.model.points, PathBuf::from("/abs/points.json"));
        assert_eq!(cfg.model.working_dir, dir.path().join("."));
    }

    #[test]
    fn run_params_mirror_run_section() {
        let cfg = CosimConfig::default();
        let params = cfg.run_params();
        assert_eq!(params.clock_mode, cfg.run.clock);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn error_display_names_field() {
        let e = ConfigError {
            field: "run.timescale".to_string(),
            message: "must be > 0".to_string(),
        };
        assert_eq!(e.to_string(), "config error: run.timescale: must be > 0");
    }
}
