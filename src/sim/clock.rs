use crate::config::ConfigError;

/// Tolerance used when comparing simulated times (hours).
const TIME_EPS: f64 = 1e-9;

/// A simulation time cursor that advances monotonically toward a stop time.
///
/// The cursor proposes the next time to request from the federation and then
/// accepts the time actually granted. Grants must move strictly forward and
/// never past the request.
///
/// # Examples
///
/// ```
/// use der_cosim::sim::clock::TimeCursor;
///
/// let mut cursor = TimeCursor::new(0.25, 1.0).unwrap();
/// let mut grants = Vec::new();
/// while let Some(next) = cursor.next_request() {
///     cursor.advance_to(next, next).unwrap();
///     grants.push(cursor.current_hr());
/// }
/// assert_eq!(grants, vec![0.25, 0.5, 0.75, 1.0]);
/// ```
#[derive(Debug, Clone)]
pub struct TimeCursor {
    /// Current simulated time in hours
    current_hr: f64,
    /// Nominal step size in hours
    step_hr: f64,
    /// Time at which the run ends
    stop_hr: f64,
    /// Number of grants accepted so far
    steps: usize,
}

/// A grant that would break time ordering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrantRejected {
    pub current_hr: f64,
    pub requested_hr: f64,
    pub granted_hr: f64,
}

impl TimeCursor {
    /// Creates a cursor at time zero.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the step size is not positive or the stop
    /// time is negative.
    pub fn new(step_hr: f64, stop_hr: f64) -> Result<Self, ConfigError> {
        if !(step_hr.is_finite() && step_hr > 0.0) {
            return Err(ConfigError::new("simulation.step_hours", "must be > 0"));
        }
        if !(stop_hr.is_finite() && stop_hr >= 0.0) {
            return Err(ConfigError::new("simulation.stop_hours", "must be >= 0"));
        }
        Ok(Self {
            current_hr: 0.0,
            step_hr,
            stop_hr,
            steps: 0,
        })
    }

    pub fn current_hr(&self) -> f64 {
        self.current_hr
    }

    pub fn step_hr(&self) -> f64 {
        self.step_hr
    }

    pub fn stop_hr(&self) -> f64 {
        self.stop_hr
    }

    /// Number of grants accepted since the last reset.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Returns `true` once the cursor has reached the stop time.
    pub fn is_finished(&self) -> bool {
        self.current_hr >= self.stop_hr - TIME_EPS
    }

    /// The next time to request, capped at the stop time.
    ///
    /// # Returns
    ///
    /// * `Some(time)` - The time to request from the federation
    /// * `None` - If the stop time has been reached
    pub fn next_request(&self) -> Option<f64> {
        if self.is_finished() {
            None
        } else {
            Some((self.current_hr + self.step_hr).min(self.stop_hr))
        }
    }

    /// Accepts a granted time and returns the elapsed duration in hours.
    ///
    /// # Errors
    ///
    /// Returns `GrantRejected` if `granted_hr` does not lie in
    /// `(current, requested]`.
    pub fn advance_to(&mut self, requested_hr: f64, granted_hr: f64) -> Result<f64, GrantRejected> {
        let rejected = GrantRejected {
            current_hr: self.current_hr,
            requested_hr,
            granted_hr,
        };
        if !granted_hr.is_finite()
            || granted_hr <= self.current_hr + TIME_EPS
            || granted_hr > requested_hr + TIME_EPS
        {
            return Err(rejected);
        }
        let elapsed = granted_hr - self.current_hr;
        self.current_hr = granted_hr;
        self.steps += 1;
        Ok(elapsed)
    }

    /// Ends the run at the current time. The step in progress still completes.
    pub fn stop_now(&mut self) {
        self.stop_hr = self.current_hr;
    }

    /// Rewinds to time zero for a new run with the given stop time.
    pub fn reset(&mut self, stop_hr: f64) {
        self.current_hr = 0.0;
        self.stop_hr = stop_hr.max(0.0);
        self.steps = 0;
    }
}
