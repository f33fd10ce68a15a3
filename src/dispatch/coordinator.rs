//! Process-wide session registry and the internal-clock driver.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::Model;
use crate::run::{
    ClockMode, EventSink, PacingClock, RunError, RunParams, RunSession, RunState, SessionId,
    SessionStatus, StatusHandle, StepOutcome,
};
use crate::transport::{CancelToken, Transport};

/// Builds a fresh transport for every submitted session.
pub type TransportFactory<T> = Box<dyn Fn() -> T + Send + Sync>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),
    #[error("session limit of {limit} reached")]
    CapacityExceeded { limit: usize },
    #[error("coordinator is shutting down")]
    ShuttingDown,
    #[error("failed to spawn the internal clock driver: {0}")]
    Spawn(#[source] io::Error),
    #[error(transparent)]
    Run(#[from] RunError),
}

/// Registry entry. The cancel token and status are reachable without the
/// session lock, which a blocked exchange may be holding.
struct SessionHandle<T: Transport> {
    session: Mutex<RunSession<T>>,
    cancel: CancelToken,
    status: StatusHandle,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> SessionHandle<T> {
    fn lock(&self) -> MutexGuard<'_, RunSession<T>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join_driver(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            if driver.join().is_err() {
                warn!(session_id = %self.status.snapshot().session_id, "clock driver panicked");
            }
        }
    }
}

/// Owns every session of the process and serialises access to each one.
///
/// Operations on one session run one at a time (a second `advance` waits for
/// the first); different sessions proceed in parallel.
pub struct Coordinator<T: Transport + 'static> {
    factory: TransportFactory<T>,
    events: Arc<dyn EventSink>,
    max_sessions: usize,
    pacing_slice: Duration,
    sessions: RwLock<HashMap<SessionId, Arc<SessionHandle<T>>>>,
    shutting_down: AtomicBool,
}

impl<T: Transport + 'static> Coordinator<T> {
    /// Creates an empty registry.
    ///
    /// # Arguments
    ///
    /// * `max_sessions` - Limit on live (non-terminal) sessions
    /// * `factory` - Builds the transport of each new session
    /// * `events` - Receives the events of every session
    pub fn new(
        max_sessions: usize,
        factory: impl Fn() -> T + Send + Sync + 'static,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            factory: Box::new(factory),
            events,
            max_sessions,
            pacing_slice: Duration::from_millis(50),
            sessions: RwLock::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Granularity at which internal-clock pauses notice a stop request.
    pub fn with_pacing_slice(mut self, slice: Duration) -> Self {
        self.pacing_slice = slice;
        self
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Registers a new session in `Ready`.
    ///
    /// # Errors
    ///
    /// `ShuttingDown` after [`shutdown`](Self::shutdown); `CapacityExceeded`
    /// when `max_sessions` sessions are still live.
    pub fn submit(&self, model: Arc<Model>) -> Result<SessionId, DispatchError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(DispatchError::ShuttingDown);
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let live = sessions
            .values()
            .filter(|h| !h.status.snapshot().state.is_terminal())
            .count();
        if live >= self.max_sessions {
            return Err(DispatchError::CapacityExceeded {
                limit: self.max_sessions,
            });
        }

        let id = SessionId::new();
        let session = RunSession::new(id, model, (self.factory)(), Arc::clone(&self.events));
        let handle = SessionHandle {
            cancel: session.cancel_token(),
            status: session.status_handle(),
            session: Mutex::new(session),
            driver: Mutex::new(None),
        };
        sessions.insert(id, Arc::new(handle));
        info!(session_id = %id, live = live + 1, "session registered");
        Ok(id)
    }

    /// Starts a session; under the internal clock also spawns its driver.
    ///
    /// Blocks until the engine connects (or the start fails).
    ///
    /// # Errors
    ///
    /// `UnknownSession`, `Spawn`, or any `RunError` from the session's start.
    pub fn start(&self, id: SessionId, params: RunParams) -> Result<(), DispatchError> {
        let handle = self.handle(id)?;
        let clock_mode = params.clock_mode;
        let timescale = params.timescale;
        handle.lock().start(params)?;

        if clock_mode == ClockMode::Internal {
            let driver_handle = Arc::clone(&handle);
            let slice = self.pacing_slice;
            let spawned = thread::Builder::new()
                .name(format!("cosim-clock-{id}"))
                .spawn(move || drive(&driver_handle, timescale, slice));
            match spawned {
                Ok(driver) => {
                    *handle.driver.lock().unwrap_or_else(PoisonError::into_inner) = Some(driver);
                }
                Err(e) => {
                    handle.cancel.cancel();
                    handle.lock().stop();
                    return Err(DispatchError::Spawn(e));
                }
            }
        }
        Ok(())
    }

    /// # Errors
    ///
    /// `UnknownSession` or the session's `RunError`.
    pub fn advance(&self, id: SessionId, caller: &str) -> Result<StepOutcome, DispatchError> {
        Ok(self.handle(id)?.lock().advance(caller)?)
    }

    /// # Errors
    ///
    /// `UnknownSession` or the session's `RunError`.
    pub fn set_inputs(&self, id: SessionId, values: &HashMap<String, f64>) -> Result<(), DispatchError> {
        Ok(self.handle(id)?.lock().set_inputs(values)?)
    }

    /// # Errors
    ///
    /// `UnknownSession` or the session's `RunError`.
    pub fn release_inputs(&self, id: SessionId, ids: &[String]) -> Result<(), DispatchError> {
        Ok(self.handle(id)?.lock().release_inputs(ids)?)
    }

    /// # Errors
    ///
    /// `UnknownSession` or the session's `RunError`.
    pub fn outputs(&self, id: SessionId) -> Result<HashMap<String, f64>, DispatchError> {
        Ok(self.handle(id)?.lock().outputs()?)
    }

    /// Stops a session, interrupting any blocked accept, read or pause, and
    /// waits for its driver to exit. Returns the resulting state.
    ///
    /// # Errors
    ///
    /// `UnknownSession` if `id` is not registered.
    pub fn stop(&self, id: SessionId) -> Result<RunState, DispatchError> {
        let handle = self.handle(id)?;
        Ok(stop_handle(&handle))
    }

    /// Snapshot of one session; never waits on the session itself.
    ///
    /// # Errors
    ///
    /// `UnknownSession` if `id` is not registered.
    pub fn status(&self, id: SessionId) -> Result<SessionStatus, DispatchError> {
        Ok(self.handle(id)?.status.snapshot())
    }

    /// Snapshots of every registered session, ordered by id.
    pub fn sessions(&self) -> Vec<SessionStatus> {
        let mut all: Vec<SessionStatus> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|h| h.status.snapshot())
            .collect();
        all.sort_by_key(|s| s.session_id);
        all
    }

    /// Drops terminal sessions from the registry. Returns how many were removed.
    pub fn reap(&self) -> usize {
        let reaped: Vec<Arc<SessionHandle<T>>> = {
            let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
            let done: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, h)| h.status.snapshot().state.is_terminal())
                .map(|(id, _)| *id)
                .collect();
            done.iter().filter_map(|id| sessions.remove(id)).collect()
        };
        for handle in &reaped {
            handle.join_driver();
        }
        if !reaped.is_empty() {
            debug!(count = reaped.len(), "reaped terminal sessions");
        }
        reaped.len()
    }

    /// Stops every session and refuses further submits. Idempotent.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<Arc<SessionHandle<T>>> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        info!(sessions = handles.len(), "coordinator shutting down");
        for handle in &handles {
            stop_handle(handle);
        }
    }

    fn handle(&self, id: SessionId) -> Result<Arc<SessionHandle<T>>, DispatchError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(DispatchError::UnknownSession(id))
    }
}

impl<T: Transport + 'static> Drop for Coordinator<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Trips the cancel token first so a blocked holder releases the lock.
fn stop_handle<T: Transport>(handle: &SessionHandle<T>) -> RunState {
    handle.cancel.cancel();
    let state = handle.lock().stop();
    handle.join_driver();
    state
}

/// Internal-clock loop: step, pause `Δsim / timescale`, repeat until the
/// engine finishes, the end datetime is reached, a step fails, or the
/// session is stopped.
fn drive<T: Transport>(handle: &SessionHandle<T>, timescale: f64, slice: Duration) {
    let mut clock = PacingClock::new(timescale);
    let steps = clock.run(&handle.cancel, slice, || {
        let mut session = handle.lock();
        if session.state() != RunState::Running {
            return None;
        }
        match session.step() {
            Ok(StepOutcome::Advanced { sim_time }) if session.reached_end() => {
                debug!(session_id = %session.id(), sim_time, "end datetime reached");
                session.stop();
                None
            }
            Ok(StepOutcome::Advanced { sim_time }) => Some(sim_time),
            Ok(StepOutcome::Finished) => None,
            Err(err) => {
                warn!(session_id = %session.id(), error = %err, "internal clock stopped");
                None
            }
        }
    });
    debug!(session_id = %handle.status.snapshot().session_id, steps, "internal clock exited");
}
