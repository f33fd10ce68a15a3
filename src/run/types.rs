//! Core run types: identifiers, lifecycle states, parameters and step records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::Deserialize;
use uuid::Uuid;

/// Unique id of one run session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Who paces the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// The controller steps the engine itself at a rate derived from the timescale.
    Internal,
    /// Every timestep is driven by one caller-issued advance.
    External,
}

impl fmt::Display for ClockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal => f.write_str("internal"),
            Self::External => f.write_str("external"),
        }
    }
}

impl FromStr for ClockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(Self::Internal),
            "external" => Ok(Self::External),
            other => Err(format!(
                "unknown clock mode \"{other}\", expected \"internal\" or \"external\""
            )),
        }
    }
}

/// Run lifecycle. `Complete` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Ready,
    Starting,
    Running,
    Complete,
    Error,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Parameters supplied with `start`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunParams {
    pub clock_mode: ClockMode,
    /// Wall-calendar instant that simulation time zero corresponds to.
    pub start_datetime: NaiveDateTime,
    /// The internal clock stops the run once simulation time reaches this.
    pub end_datetime: NaiveDateTime,
    /// Simulated seconds per wall-clock second for the internal clock.
    pub timescale: f64,
}

impl RunParams {
    /// Checks the parameters are self-consistent.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.end_datetime <= self.start_datetime {
            return Err(format!(
                "end_datetime {} must be after start_datetime {}",
                self.end_datetime, self.start_datetime
            ));
        }
        if !self.timescale.is_finite() || self.timescale <= 0.0 {
            return Err(format!(
                "timescale must be a positive number, got {}",
                self.timescale
            ));
        }
        Ok(())
    }
}

/// Result of one successful exchange with the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// The engine produced outputs for the given simulation time.
    Advanced { sim_time: f64 },
    /// The engine signalled the end of the simulation.
    Finished,
}

/// Point-in-time view of a session, readable while the session is busy.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub model: String,
    pub state: RunState,
    pub clock_mode: Option<ClockMode>,
    /// Latest simulation time reported by the engine (seconds).
    pub sim_time: f64,
    /// Number of completed exchanges.
    pub steps: u64,
    /// `start_datetime + sim_time`, once started.
    pub datetime: Option<NaiveDateTime>,
    /// First fatal cause, if the run failed.
    pub failure: Option<String>,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session {} ({}): {} after {} steps, sim_time={:.1}s",
            self.session_id, self.model, self.state, self.steps, self.sim_time
        )?;
        if let Some(datetime) = self.datetime {
            write!(f, " at {datetime}")?;
        }
        if let Some(failure) = &self.failure {
            write!(f, ", failure: {failure}")?;
        }
        Ok(())
    }
}

/// Outputs observed at one completed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub session_id: SessionId,
    /// One-based step counter.
    pub step: u64,
    pub sim_time: f64,
    /// Output values keyed by external id, in id order.
    pub outputs: BTreeMap<String, f64>,
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step={:>5}  t={:>10.1}s |", self.step, self.sim_time)?;
        for (id, value) in &self.outputs {
            write!(f, " {id}={value:.3}")?;
        }
        Ok(())
    }
}
