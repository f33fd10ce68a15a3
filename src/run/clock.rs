use std::time::Duration;

use crate::transport::CancelToken;

/// Wall-clock pacing for internal-clock runs.
///
/// Each step reports the simulation time the engine reached; the clock turns
/// the simulated delta since the previous step into a wall-clock pause of
/// `delta / timescale`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cosim_ctl::run::clock::PacingClock;
///
/// let mut clock = PacingClock::new(60.0);
/// assert_eq!(clock.interval_after(0.0), Duration::ZERO);
/// assert_eq!(clock.interval_after(60.0), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct PacingClock {
    /// Simulated seconds per wall-clock second.
    timescale: f64,
    /// Simulation time reached at the previous step.
    last_sim_time: Option<f64>,
}

impl PacingClock {
    /// Creates a clock for a positive `timescale`.
    pub fn new(timescale: f64) -> Self {
        Self {
            timescale,
            last_sim_time: None,
        }
    }

    /// Pause owed after the engine reached `sim_time`.
    ///
    /// The first step and steps where simulation time did not move owe
    /// nothing.
    pub fn interval_after(&mut self, sim_time: f64) -> Duration {
        let delta = match self.last_sim_time.replace(sim_time) {
            Some(previous) => (sim_time - previous).max(0.0),
            None => 0.0,
        };
        Duration::try_from_secs_f64(delta / self.timescale).unwrap_or(Duration::ZERO)
    }

    /// Calls `step` until it returns `None` or `cancel` trips, pausing between
    /// steps.
    ///
    /// # Arguments
    ///
    /// * `cancel` - Checked before each step and during every pause
    /// * `slice` - Granularity at which pauses observe `cancel`
    /// * `step` - Advances the run, returning the simulation time reached
    ///
    /// # Returns
    ///
    /// The number of steps taken.
    pub fn run(
        &mut self,
        cancel: &CancelToken,
        slice: Duration,
        mut step: impl FnMut() -> Option<f64>,
    ) -> usize {
        let mut taken = 0;
        while !cancel.is_cancelled() {
            let Some(sim_time) = step() else {
                break;
            };
            taken += 1;
            let pause = self.interval_after(sim_time);
            if !cancel.sleep(pause, slice) {
                break;
            }
        }
        taken
    }
}
