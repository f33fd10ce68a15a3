use thiserror::Error;

use super::types::{ClockMode, RunState, SessionId};
use crate::points::PointError;
use crate::protocol::Flag;
use crate::transport::TransportError;

/// Run controller failures.
///
/// Usage errors (`InvalidState`, `OutputsNotAvailable`, `InvalidParameters`,
/// `ClockMode`, `UnknownPoint`) leave the session where it was; `state` is
/// that prior state. The remaining variants are fatal and `state` is the
/// state the session was in when the failure struck.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("session {session_id}: cannot {operation} while {state}")]
    InvalidState {
        session_id: SessionId,
        operation: &'static str,
        state: RunState,
    },
    #[error("session {session_id}: no outputs before the first completed step ({state})")]
    OutputsNotAvailable {
        session_id: SessionId,
        state: RunState,
    },
    #[error("session {session_id}: invalid run parameters: {message}")]
    InvalidParameters {
        session_id: SessionId,
        state: RunState,
        message: String,
    },
    #[error("session {session_id}: {operation} is not available under the {clock} clock")]
    ClockMode {
        session_id: SessionId,
        operation: &'static str,
        clock: ClockMode,
        state: RunState,
    },
    #[error("session {session_id}: {source}")]
    UnknownPoint {
        session_id: SessionId,
        state: RunState,
        #[source]
        source: PointError,
    },
    #[error("session {session_id}: point mapping failed: {source}")]
    Mapping {
        session_id: SessionId,
        state: RunState,
        #[source]
        source: PointError,
    },
    #[error("session {session_id}: {operation} failed while {state}: {source}")]
    Transport {
        session_id: SessionId,
        operation: &'static str,
        state: RunState,
        #[source]
        source: TransportError,
    },
    #[error("session {session_id}: engine reported {flag} while {state}")]
    EngineReported {
        session_id: SessionId,
        state: RunState,
        flag: Flag,
    },
    #[error("session {session_id}: engine sent {found} outputs, {expected} declared")]
    OutputShape {
        session_id: SessionId,
        state: RunState,
        expected: usize,
        found: usize,
    },
}

impl RunError {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::InvalidState { session_id, .. }
            | Self::OutputsNotAvailable { session_id, .. }
            | Self::InvalidParameters { session_id, .. }
            | Self::ClockMode { session_id, .. }
            | Self::UnknownPoint { session_id, .. }
            | Self::Mapping { session_id, .. }
            | Self::Transport { session_id, .. }
            | Self::EngineReported { session_id, .. }
            | Self::OutputShape { session_id, .. } => *session_id,
        }
    }

    /// State attached to the error (see the type docs for its meaning).
    pub fn state(&self) -> RunState {
        match self {
            Self::InvalidState { state, .. }
            | Self::OutputsNotAvailable { state, .. }
            | Self::InvalidParameters { state, .. }
            | Self::ClockMode { state, .. }
            | Self::UnknownPoint { state, .. }
            | Self::Mapping { state, .. }
            | Self::Transport { state, .. }
            | Self::EngineReported { state, .. }
            | Self::OutputShape { state, .. } => *state,
        }
    }

    /// `true` for caller mistakes that did not change the session's state.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. }
                | Self::OutputsNotAvailable { .. }
                | Self::InvalidParameters { .. }
                | Self::ClockMode { .. }
                | Self::UnknownPoint { .. }
        )
    }
}
