//! The run state machine for one model execution.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{NaiveDateTime, TimeDelta};
use tracing::{debug, warn};

use super::error::RunError;
use super::event::{EventSink, RunEvent};
use super::types::{ClockMode, RunParams, RunState, SessionId, SessionStatus, StepOutcome, StepRecord};
use crate::model::Model;
use crate::points::PointResolver;
use crate::protocol::{Flag, Packet};
use crate::transport::{CancelToken, Transport, TransportError};

/// Status snapshot shared between a session and its observers.
///
/// The session republishes after every change, so readers never need the
/// session itself (which may be blocked in an engine exchange).
#[derive(Debug, Clone)]
pub struct StatusHandle(Arc<Mutex<SessionStatus>>);

impl StatusHandle {
    pub fn snapshot(&self) -> SessionStatus {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn publish(&self, status: SessionStatus) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }
}

/// One run of a model, driving its engine through a [`Transport`].
///
/// Generic over `T: Transport` so the lifecycle can be exercised against a
/// scripted engine as well as a real subprocess.
pub struct RunSession<T: Transport> {
    id: SessionId,
    model: Arc<Model>,
    transport: T,
    events: Arc<dyn EventSink>,
    status: StatusHandle,
    state: RunState,
    params: Option<RunParams>,
    resolver: Option<PointResolver>,
    /// Input vector written with the next exchange; values persist until overwritten.
    pending_inputs: Vec<f64>,
    /// Reals of the latest Communicate packet.
    last_outputs: Option<Vec<f64>>,
    sim_time: f64,
    steps: u64,
    failure: Option<String>,
}

impl<T: Transport> RunSession<T> {
    /// Creates a session in `Ready`. Nothing is launched until [`start`](Self::start).
    pub fn new(id: SessionId, model: Arc<Model>, transport: T, events: Arc<dyn EventSink>) -> Self {
        let status = StatusHandle(Arc::new(Mutex::new(SessionStatus {
            session_id: id,
            model: model.name.clone(),
            state: RunState::Ready,
            clock_mode: None,
            sim_time: 0.0,
            steps: 0,
            datetime: None,
            failure: None,
        })));
        debug!(session_id = %id, model = %model.name, "session submitted");
        Self {
            id,
            model,
            transport,
            events,
            status,
            state: RunState::Ready,
            params: None,
            resolver: None,
            pending_inputs: Vec::new(),
            last_outputs: None,
            sim_time: 0.0,
            steps: 0,
            failure: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn clock_mode(&self) -> Option<ClockMode> {
        self.params.as_ref().map(|p| p.clock_mode)
    }

    pub fn params(&self) -> Option<&RunParams> {
        self.params.as_ref()
    }

    /// Latest simulation time reported by the engine, in seconds.
    pub fn current_sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Calendar time of the latest step: `start_datetime + sim_time`.
    pub fn current_datetime(&self) -> Option<NaiveDateTime> {
        let params = self.params.as_ref()?;
        let millis = (self.sim_time * 1000.0).round() as i64;
        let offset = TimeDelta::try_milliseconds(millis)?;
        params.start_datetime.checked_add_signed(offset)
    }

    /// `true` once simulation time has reached the run's end datetime.
    pub fn reached_end(&self) -> bool {
        match (self.current_datetime(), self.params.as_ref()) {
            (Some(now), Some(params)) => now >= params.end_datetime,
            _ => false,
        }
    }

    /// Resolver built at start; `None` before that.
    pub fn resolver(&self) -> Option<&PointResolver> {
        self.resolver.as_ref()
    }

    /// Input vector that the next exchange will write.
    pub fn pending_inputs(&self) -> &[f64] {
        &self.pending_inputs
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Token that interrupts this session's blocked waits.
    pub fn cancel_token(&self) -> CancelToken {
        self.transport.cancel_token()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.snapshot()
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Builds the resolver, launches the engine and waits for it to connect.
    ///
    /// # Errors
    ///
    /// * `InvalidState` unless the session is `Ready`
    /// * `InvalidParameters` if `params` fail validation (session stays `Ready`)
    /// * `Mapping` or `Transport` on launch failures (session goes to `Error`)
    pub fn start(&mut self, params: RunParams) -> Result<(), RunError> {
        self.require(RunState::Ready, "start")?;
        if let Err(message) = params.validate() {
            return Err(RunError::InvalidParameters {
                session_id: self.id,
                state: self.state,
                message,
            });
        }

        self.params = Some(params);
        self.transition(RunState::Starting, None);

        let resolver = match PointResolver::new(&self.model.variables, &self.model.points) {
            Ok(resolver) => resolver,
            Err(source) => {
                self.enter_error(source.to_string());
                return Err(RunError::Mapping {
                    session_id: self.id,
                    state: RunState::Starting,
                    source,
                });
            }
        };
        self.pending_inputs = vec![0.0; resolver.input_count()];
        self.resolver = Some(resolver);

        let launched = self
            .transport
            .start(&self.model.launch)
            .and_then(|()| self.transport.accept_connection());
        if let Err(source) = launched {
            return Err(self.fail_transport("start", source));
        }

        self.transition(RunState::Running, None);
        Ok(())
    }

    /// Performs one caller-driven step under the external clock.
    ///
    /// Writes the pending inputs, then blocks until the engine answers.
    ///
    /// # Errors
    ///
    /// * `InvalidState` unless `Running`; `ClockMode` under the internal clock
    /// * `Transport`, `EngineReported` or `OutputShape` when the exchange
    ///   fails (session goes to `Error`)
    pub fn advance(&mut self, caller: &str) -> Result<StepOutcome, RunError> {
        self.require(RunState::Running, "advance")?;
        if let Some(clock @ ClockMode::Internal) = self.clock_mode() {
            return Err(RunError::ClockMode {
                session_id: self.id,
                operation: "advance",
                clock,
                state: self.state,
            });
        }
        debug!(session_id = %self.id, caller, "advance requested");
        self.exchange("advance")
    }

    /// Step path used by the internal-clock driver.
    pub(crate) fn step(&mut self) -> Result<StepOutcome, RunError> {
        self.require(RunState::Running, "step")?;
        self.exchange("step")
    }

    /// Writes input values for the next step.
    ///
    /// All ids are resolved before anything is written: one unknown id fails
    /// the whole call and leaves the pending vector untouched. Points with an
    /// enable companion get that slot set to `1.0`.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless `Running`; `UnknownPoint` for an unknown id.
    pub fn set_inputs(&mut self, values: &HashMap<String, f64>) -> Result<(), RunError> {
        let writes = self.resolve_inputs(values.iter().map(|(id, v)| (id.as_str(), *v)), "set inputs")?;
        for (index, enable, value) in writes {
            self.write_slot(index, value);
            if let Some(enable) = enable {
                self.write_slot(enable, 1.0);
            }
        }
        Ok(())
    }

    /// Hands inputs back to the model: zeroes each value and its enable slot.
    ///
    /// # Errors
    ///
    /// Same as [`set_inputs`](Self::set_inputs).
    pub fn release_inputs(&mut self, ids: &[String]) -> Result<(), RunError> {
        let writes = self.resolve_inputs(ids.iter().map(|id| (id.as_str(), 0.0)), "release inputs")?;
        for (index, enable, _) in writes {
            self.write_slot(index, 0.0);
            if let Some(enable) = enable {
                self.write_slot(enable, 0.0);
            }
        }
        Ok(())
    }

    /// Latest outputs keyed by external id.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside `Running`/`Complete`; `OutputsNotAvailable`
    /// before the engine produced its first outputs.
    pub fn outputs(&self) -> Result<HashMap<String, f64>, RunError> {
        if !matches!(self.state, RunState::Running | RunState::Complete) {
            return Err(self.invalid_state("read outputs"));
        }
        match (&self.last_outputs, &self.resolver) {
            (Some(values), Some(resolver)) => Ok(resolver.gather_outputs(values)),
            _ => Err(RunError::OutputsNotAvailable {
                session_id: self.id,
                state: self.state,
            }),
        }
    }

    /// Ends the run and tears the transport down.
    ///
    /// Non-terminal sessions become `Complete`; terminal sessions are left as
    /// they are. Returns the resulting state.
    pub fn stop(&mut self) -> RunState {
        if self.state.is_terminal() {
            self.transport.stop(false);
            return self.state;
        }
        self.transport.stop(true);
        self.transition(RunState::Complete, Some("stopped".to_string()));
        self.state
    }

    fn exchange(&mut self, operation: &'static str) -> Result<StepOutcome, RunError> {
        let request = Packet::communicate(self.sim_time, self.pending_inputs.clone());
        if let Err(source) = self.transport.write_packet(&request) {
            return Err(self.fail_transport(operation, source));
        }
        let reply = match self.transport.read_packet() {
            Ok(reply) => reply,
            Err(source) => return Err(self.fail_transport(operation, source)),
        };

        match reply.flag {
            Flag::Communicate => self.accept_outputs(reply),
            Flag::Finish => {
                self.transition(RunState::Complete, Some("engine finished".to_string()));
                self.transport.stop(false);
                Ok(StepOutcome::Finished)
            }
            flag => {
                let state = self.state;
                self.enter_error(format!("engine reported {flag}"));
                Err(RunError::EngineReported {
                    session_id: self.id,
                    state,
                    flag,
                })
            }
        }
    }

    fn accept_outputs(&mut self, reply: Packet) -> Result<StepOutcome, RunError> {
        let expected = self.resolver.as_ref().map_or(0, PointResolver::output_count);
        if reply.reals.len() != expected {
            let state = self.state;
            let found = reply.reals.len();
            self.enter_error(format!("engine sent {found} outputs, {expected} declared"));
            return Err(RunError::OutputShape {
                session_id: self.id,
                state,
                expected,
                found,
            });
        }

        if let Some(sim_time) = reply.sim_time {
            self.sim_time = sim_time;
        }
        self.steps += 1;
        if let Some(resolver) = &self.resolver {
            let outputs: BTreeMap<String, f64> =
                resolver.gather_outputs(&reply.reals).into_iter().collect();
            self.events.emit(&RunEvent::Stepped(StepRecord {
                session_id: self.id,
                step: self.steps,
                sim_time: self.sim_time,
                outputs,
            }));
        }
        self.last_outputs = Some(reply.reals);
        self.publish();
        Ok(StepOutcome::Advanced {
            sim_time: self.sim_time,
        })
    }

    fn resolve_inputs<'a>(
        &self,
        values: impl Iterator<Item = (&'a str, f64)>,
        operation: &'static str,
    ) -> Result<Vec<(usize, Option<usize>, f64)>, RunError> {
        self.require(RunState::Running, operation)?;
        let Some(resolver) = &self.resolver else {
            return Err(self.invalid_state(operation));
        };
        values
            .map(|(id, value)| {
                resolver
                    .resolve_input_index(id)
                    .map(|index| (index, resolver.enable_index(id), value))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| RunError::UnknownPoint {
                session_id: self.id,
                state: self.state,
                source,
            })
    }

    fn write_slot(&mut self, index: usize, value: f64) {
        if let Some(slot) = self.pending_inputs.get_mut(index) {
            *slot = value;
        }
    }

    fn require(&self, expected: RunState, operation: &'static str) -> Result<(), RunError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> RunError {
        RunError::InvalidState {
            session_id: self.id,
            operation,
            state: self.state,
        }
    }

    /// A cancelled wait means a stop request interrupted the exchange; the
    /// run ends `Complete`. Any other transport failure is fatal.
    fn fail_transport(&mut self, operation: &'static str, source: TransportError) -> RunError {
        let state = self.state;
        if matches!(source, TransportError::Cancelled) {
            self.transport.stop(true);
            self.transition(RunState::Complete, Some(format!("stopped during {operation}")));
        } else {
            self.enter_error(format!("{operation}: {source}"));
        }
        RunError::Transport {
            session_id: self.id,
            operation,
            state,
            source,
        }
    }

    /// Records the first fatal cause, moves to `Error` and tears down.
    fn enter_error(&mut self, cause: String) {
        warn!(session_id = %self.id, state = %self.state, cause = %cause, "session failed");
        if self.failure.is_none() {
            self.failure = Some(cause.clone());
        }
        self.transition(RunState::Error, Some(cause));
        self.transport.stop(false);
    }

    fn transition(&mut self, to: RunState, cause: Option<String>) {
        let from = self.state;
        self.state = to;
        self.events.emit(&RunEvent::StateChanged {
            session_id: self.id,
            from,
            to,
            cause,
        });
        self.publish();
    }

    fn publish(&self) {
        self.status.publish(SessionStatus {
            session_id: self.id,
            model: self.model.name.clone(),
            state: self.state,
            clock_mode: self.clock_mode(),
            sim_time: self.sim_time,
            steps: self.steps,
            datetime: self.current_datetime(),
            failure: self.failure.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::run::event::EventLog;
    use crate::run::testing::{ScriptedTransport, sample_model};
    use crate::transport::TransportState;

    fn params(clock_mode: ClockMode) -> RunParams {
        let day = NaiveDate::from_ymd_opt(2019, 1, 1).expect("valid date");
        RunParams {
            clock_mode,
            start_datetime: day.and_hms_opt(0, 0, 0).expect("valid time"),
            end_datetime: day.and_hms_opt(1, 0, 0).expect("valid time"),
            timescale: 60.0,
        }
    }

    fn session(transport: ScriptedTransport) -> (RunSession<ScriptedTransport>, Arc<EventLog>) {
        let log = Arc::new(EventLog::new());
        let session = RunSession::new(SessionId::new(), Arc::new(sample_model()), transport, log.clone());
        (session, log)
    }

    fn running(replies: &[&str]) -> (RunSession<ScriptedTransport>, Arc<EventLog>) {
        let (mut s, log) = session(ScriptedTransport::replying(replies));
        s.start(params(ClockMode::External)).expect("start should succeed");
        (s, log)
    }

    fn inputs(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn start_moves_ready_to_running() {
        let (s, log) = running(&[]);
        assert_eq!(s.state(), RunState::Running);
        assert_eq!(log.transitions(s.id()), vec![RunState::Starting, RunState::Running]);
        assert_eq!(s.transport().state(), TransportState::Connected);
        assert_eq!(s.pending_inputs(), &[0.0, 0.0, 0.0]);
        assert_eq!(s.status().state, RunState::Running);
    }

    #[test]
    fn scenario_single_output_packet() {
        let (mut s, _) = running(&["2 0 2 0 0 3.000000000000000e+02 2.150000000000000e+01 5.000000000000000e+00 \n"]);
        let outcome = s.advance("tester").expect("advance should succeed");
        assert_eq!(outcome, StepOutcome::Advanced { sim_time: 300.0 });
        let outputs = s.outputs().expect("outputs after advance");
        assert_eq!(outputs.get("T1"), Some(&21.5));
        assert_eq!(outputs.get("OAT"), Some(&5.0));
        assert_eq!(s.current_sim_time(), 300.0);
        assert_eq!(s.steps(), 1);
    }

    #[test]
    fn finish_packet_completes_without_error() {
        let (mut s, log) = running(&["2 1\n"]);
        assert_eq!(s.advance("tester").expect("finish is not an error"), StepOutcome::Finished);
        assert_eq!(s.state(), RunState::Complete);
        assert_eq!(s.transport().state(), TransportState::Stopped);
        assert_eq!(
            log.transitions(s.id()),
            vec![RunState::Starting, RunState::Running, RunState::Complete]
        );
    }

    #[test]
    fn inputs_are_sticky_across_advances() {
        let reply = "2 0 2 0 0 6.000000000000000e+01 2.000000000000000e+01 1.000000000000000e+00 \n";
        let (mut s, _) = running(&[reply, reply]);
        s.set_inputs(&inputs(&[("u1", 12.0)])).expect("known input");
        s.advance("tester").expect("first advance");
        s.advance("tester").expect("second advance");

        let written = s.transport().written();
        assert_eq!(written.len(), 2);
        for packet in &written {
            assert_eq!(packet.flag, Flag::Communicate);
            assert_eq!(packet.reals[0], 12.0);
        }
        assert_eq!(written[1].sim_time, Some(60.0));
    }

    #[test]
    fn set_inputs_sets_enable_companion() {
        let (mut s, _) = running(&[]);
        s.set_inputs(&inputs(&[("u1", 12.0), ("sp", 22.0)])).expect("known inputs");
        // u1 -> slot 0, sp -> slot 1 with enable slot 2
        assert_eq!(s.pending_inputs(), &[12.0, 22.0, 1.0]);

        s.release_inputs(&["sp".to_string()]).expect("known input");
        assert_eq!(s.pending_inputs(), &[12.0, 0.0, 0.0]);
    }

    #[test]
    fn unknown_input_leaves_pending_vector_unchanged() {
        let (mut s, _) = running(&[]);
        s.set_inputs(&inputs(&[("u1", 3.0)])).expect("known input");
        let err = s
            .set_inputs(&inputs(&[("u1", 99.0), ("nope", 1.0)]))
            .unwrap_err();
        assert!(matches!(err, RunError::UnknownPoint { .. }));
        assert!(err.is_usage_error());
        assert_eq!(s.pending_inputs(), &[3.0, 0.0, 0.0]);
        assert_eq!(s.state(), RunState::Running);
    }

    #[test]
    fn output_ids_are_not_inputs() {
        let (mut s, _) = running(&[]);
        assert!(s.set_inputs(&inputs(&[("T1", 1.0)])).is_err());
    }

    #[test]
    fn advance_outside_running_is_invalid_state() {
        let (mut s, _) = session(ScriptedTransport::replying(&[]));
        let err = s.advance("tester").unwrap_err();
        assert!(matches!(err, RunError::InvalidState { state: RunState::Ready, .. }));
        assert_eq!(s.current_sim_time(), 0.0);
        assert_eq!(s.state(), RunState::Ready);

        let (mut done, _) = running(&["2 1\n"]);
        done.advance("tester").expect("finish");
        let err = done.advance("tester").unwrap_err();
        assert!(matches!(err, RunError::InvalidState { state: RunState::Complete, .. }));
        assert_eq!(done.current_sim_time(), 0.0);
    }

    #[test]
    fn outputs_before_first_advance_are_not_available() {
        let (s, _) = running(&[]);
        assert!(matches!(s.outputs(), Err(RunError::OutputsNotAvailable { .. })));

        let (ready, _) = session(ScriptedTransport::replying(&[]));
        assert!(matches!(ready.outputs(), Err(RunError::InvalidState { .. })));
    }

    #[test]
    fn outputs_remain_readable_after_complete() {
        let (mut s, _) = running(&[
            "2 0 2 0 0 6.000000000000000e+01 2.000000000000000e+01 1.000000000000000e+00 \n",
            "2 1\n",
        ]);
        s.advance("tester").expect("step");
        s.advance("tester").expect("finish");
        assert_eq!(s.outputs().expect("still readable").get("T1"), Some(&20.0));
    }

    #[test]
    fn transport_failure_drives_error_with_cause() {
        let (mut s, log) = running(&["2 0 1 0 0 1.0 garbage \n"]);
        let err = s.advance("tester").unwrap_err();
        assert!(matches!(err, RunError::Transport { state: RunState::Running, .. }));
        assert_eq!(s.state(), RunState::Error);
        assert!(s.failure().is_some());
        assert_eq!(s.transport().state(), TransportState::Stopped);
        assert_eq!(log.transitions(s.id()).last(), Some(&RunState::Error));
        assert_eq!(s.status().failure.as_deref(), s.failure());
    }

    #[test]
    fn closed_connection_drives_error() {
        let (mut s, _) = running(&[]);
        let err = s.advance("tester").unwrap_err();
        assert!(matches!(
            err,
            RunError::Transport {
                source: TransportError::Closed,
                ..
            }
        ));
        assert_eq!(s.state(), RunState::Error);
    }

    #[test]
    fn cancelled_read_completes_the_session() {
        let (mut s, _) = session(ScriptedTransport::replying(&[]).blocking_when_empty());
        s.start(params(ClockMode::External)).expect("start");
        let token = s.cancel_token();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            token.cancel();
        });
        let err = s.advance("tester").unwrap_err();
        canceller.join().expect("canceller thread");
        assert!(matches!(
            err,
            RunError::Transport {
                source: TransportError::Cancelled,
                ..
            }
        ));
        assert_eq!(s.state(), RunState::Complete);
        assert!(s.failure().is_none());
    }

    #[test]
    fn engine_error_flag_drives_error() {
        let (mut s, _) = running(&["2 -20\n"]);
        let err = s.advance("tester").unwrap_err();
        assert!(matches!(
            err,
            RunError::EngineReported {
                flag: Flag::TimeIntegrationError,
                ..
            }
        ));
        assert_eq!(s.state(), RunState::Error);
    }

    #[test]
    fn wrong_output_count_drives_error() {
        let (mut s, _) = running(&["2 0 1 0 0 6.000000000000000e+01 2.000000000000000e+01 \n"]);
        let err = s.advance("tester").unwrap_err();
        assert!(matches!(err, RunError::OutputShape { expected: 2, found: 1, .. }));
        assert_eq!(s.state(), RunState::Error);
    }

    #[test]
    fn failed_accept_drives_error() {
        let (mut s, log) = session(ScriptedTransport::replying(&[]).failing_accept());
        let err = s.start(params(ClockMode::External)).unwrap_err();
        assert!(matches!(err, RunError::Transport { state: RunState::Starting, .. }));
        assert_eq!(s.state(), RunState::Error);
        assert_eq!(
            log.transitions(s.id()),
            vec![RunState::Starting, RunState::Error]
        );
    }

    #[test]
    fn unresolved_mapping_fails_start() {
        let mut model = sample_model();
        model.points = model.points.with_output("ghost", "Zone Temp", "Nowhere");
        let mut s = RunSession::new(
            SessionId::new(),
            Arc::new(model),
            ScriptedTransport::replying(&[]),
            Arc::new(EventLog::new()),
        );
        let err = s.start(params(ClockMode::External)).unwrap_err();
        assert!(matches!(err, RunError::Mapping { .. }));
        assert_eq!(s.state(), RunState::Error);
        assert_eq!(s.transport().state(), TransportState::Stopped);
    }

    #[test]
    fn invalid_params_keep_session_ready() {
        let (mut s, _) = session(ScriptedTransport::replying(&[]));
        let mut bad = params(ClockMode::External);
        bad.timescale = 0.0;
        let err = s.start(bad).unwrap_err();
        assert!(matches!(err, RunError::InvalidParameters { .. }));
        assert_eq!(s.state(), RunState::Ready);
        assert!(s.start(params(ClockMode::External)).is_ok());
    }

    #[test]
    fn start_twice_is_invalid_state() {
        let (mut s, _) = running(&[]);
        assert!(matches!(
            s.start(params(ClockMode::External)),
            Err(RunError::InvalidState { state: RunState::Running, .. })
        ));
    }

    #[test]
    fn advance_is_rejected_under_internal_clock() {
        let (mut s, _) = session(ScriptedTransport::replying(&["2 1\n"]));
        s.start(params(ClockMode::Internal)).expect("start");
        let err = s.advance("tester").unwrap_err();
        assert!(matches!(err, RunError::ClockMode { .. }));
        assert_eq!(s.state(), RunState::Running);
        assert_eq!(s.step().expect("driver step"), StepOutcome::Finished);
    }

    #[test]
    fn stop_completes_and_is_idempotent() {
        let (mut s, log) = running(&[]);
        assert_eq!(s.stop(), RunState::Complete);
        assert!(s.transport().finish_sent());
        assert_eq!(s.stop(), RunState::Complete);
        let completes = log
            .transitions(s.id())
            .into_iter()
            .filter(|st| *st == RunState::Complete)
            .count();
        assert_eq!(completes, 1);
    }

    #[test]
    fn stop_from_ready_completes() {
        let (mut s, _) = session(ScriptedTransport::replying(&[]));
        assert_eq!(s.stop(), RunState::Complete);
    }

    #[test]
    fn stop_after_error_stays_error() {
        let (mut s, _) = running(&["2 -1\n"]);
        assert!(s.advance("tester").is_err());
        assert_eq!(s.stop(), RunState::Error);
    }

    #[test]
    fn datetime_follows_sim_time() {
        let (mut s, _) = running(&["2 0 2 0 0 3.600000000000000e+03 2.000000000000000e+01 1.000000000000000e+00 \n"]);
        assert!(!s.reached_end());
        s.advance("tester").expect("step");
        let expected = NaiveDate::from_ymd_opt(2019, 1, 1).and_then(|d| d.and_hms_opt(1, 0, 0));
        assert_eq!(s.current_datetime(), expected);
        assert!(s.reached_end());
        assert_eq!(s.status().datetime, expected);
    }

    #[test]
    fn steps_are_emitted_as_events() {
        let (mut s, log) = running(&["2 0 2 0 0 6.000000000000000e+01 2.000000000000000e+01 1.000000000000000e+00 \n"]);
        s.advance("tester").expect("step");
        let stepped: Vec<_> = log
            .events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::Stepped(record) => Some(record),
                _ => None,
            })
            .collect();
        assert_eq!(stepped.len(), 1);
        assert_eq!(stepped[0].step, 1);
        assert_eq!(stepped[0].outputs.get("T1"), Some(&20.0));
    }
}
