//! Run lifecycle: the per-session state machine, its events and pacing.

pub mod clock;
pub mod error;
pub mod event;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use clock::PacingClock;
pub use error::RunError;
pub use event::{EventLog, EventSink, FanOut, RunEvent, TracingSink, TrajectoryRecorder};
pub use session::{RunSession, StatusHandle};
pub use types::{ClockMode, RunParams, RunState, SessionId, SessionStatus, StepOutcome, StepRecord};
