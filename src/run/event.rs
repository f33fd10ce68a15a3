//! Run events and the sinks that consume them.
//!
//! The controller never persists anything itself; it hands every state
//! transition and every completed step to an [`EventSink`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use super::types::{RunState, SessionId, StepRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    StateChanged {
        session_id: SessionId,
        from: RunState,
        to: RunState,
        /// Why the transition happened, when it was not a plain success.
        cause: Option<String>,
    },
    Stepped(StepRecord),
}

impl RunEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::StateChanged { session_id, .. } => *session_id,
            Self::Stepped(record) => record.session_id,
        }
    }
}

/// Receiver of run events. Implementations must not block for long: events
/// are delivered on the thread that drives the session.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RunEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::StateChanged {
                session_id,
                from,
                to,
                cause: Some(cause),
            } if *to == RunState::Error => {
                warn!(session_id = %session_id, from = %from, to = %to, cause = %cause, "run failed");
            }
            RunEvent::StateChanged {
                session_id,
                from,
                to,
                cause,
            } => {
                info!(
                    session_id = %session_id,
                    from = %from,
                    to = %to,
                    cause = cause.as_deref().unwrap_or(""),
                    "run state changed"
                );
            }
            RunEvent::Stepped(record) => {
                info!(
                    session_id = %record.session_id,
                    step = record.step,
                    sim_time = record.sim_time,
                    outputs = record.outputs.len(),
                    "step completed"
                );
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<RunEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// States entered by `session_id`, in order.
    pub fn transitions(&self, session_id: SessionId) -> Vec<RunState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                RunEvent::StateChanged { session_id: id, to, .. } if id == session_id => Some(to),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: &RunEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Collects the per-step output records of every session for export.
#[derive(Debug, Default)]
pub struct TrajectoryRecorder {
    records: Mutex<Vec<StepRecord>>,
}

impl TrajectoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of one session in step order.
    pub fn records_for(&self, session_id: SessionId) -> Vec<StepRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn records(&self) -> Vec<StepRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Latest output values of one session.
    pub fn last_outputs(&self, session_id: SessionId) -> Option<BTreeMap<String, f64>> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|r| r.session_id == session_id)
            .map(|r| r.outputs.clone())
    }
}

impl EventSink for TrajectoryRecorder {
    fn emit(&self, event: &RunEvent) {
        if let RunEvent::Stepped(record) = event {
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(record.clone());
        }
    }
}

/// Forwards each event to several sinks in order.
#[derive(Default, Clone)]
pub struct FanOut {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanOut {
    fn emit(&self, event: &RunEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
