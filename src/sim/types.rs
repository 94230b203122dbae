//! Core simulation types: lifecycle phase, power values, and the step log.

use std::fmt;

/// Complex power at a point of interconnection.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ComplexPower {
    /// Real power (kW; positive=import, negative=reverse flow).
    pub p_kw: f64,
    /// Reactive power (kvar).
    pub q_kvar: f64,
}

impl ComplexPower {
    pub const ZERO: Self = Self {
        p_kw: 0.0,
        q_kvar: 0.0,
    };

    pub fn new(p_kw: f64, q_kvar: f64) -> Self {
        Self { p_kw, q_kvar }
    }

    /// Multiplies both components by `factor`.
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            p_kw: self.p_kw * factor,
            q_kvar: self.q_kvar * factor,
        }
    }

    /// Apparent power magnitude (kVA).
    pub fn apparent_kva(&self) -> f64 {
        self.p_kw.hypot(self.q_kvar)
    }
}

/// Orchestrator lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Units configured, nothing registered with the bus.
    Created,
    /// Channels registered, waiting for the federation to be ready.
    Initializing,
    /// Stepping simulated time.
    Executing,
    /// Bus released; terminal.
    Finalized,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Executing => "executing",
            Self::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Power request for one battery unit at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchCommand {
    /// Index of the unit in the orchestrator's battery list.
    pub unit: usize,
    /// Signed power (kW; positive=charge, negative=discharge).
    pub power_kw: f64,
}

/// Complete record of one simulated step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// Step index, starting at 0.
    pub step: usize,
    /// Granted simulation time in hours.
    pub time_hr: f64,
    /// `time_hr` wrapped into `[0, 24)`.
    pub hour_of_day: f64,
    /// Total solar generation (kW, >= 0).
    pub solar_kw: f64,
    /// Aggregate battery command from the dispatch policy (kW).
    pub battery_command_kw: f64,
    /// Aggregate battery power actually delivered (kW; positive=charge).
    pub battery_kw: f64,
    /// Energy-weighted fleet SOC after this step (0.0 to 1.0).
    pub battery_soc: f64,
    /// Net real power at the feeder head (kW; positive=import).
    pub net_p_kw: f64,
    /// Net reactive power at the feeder head (kvar).
    pub net_q_kvar: f64,
    /// Transmission-side voltage observed this step (pu).
    pub voltage_pu: Option<f64>,
    /// Market price observed this step ($/MWh).
    pub price_per_mwh: Option<f64>,
    /// Solver failed to converge; net power holds the last known value.
    pub degraded: bool,
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>3} ({:>5.2}h) | solar={:>7.1} kW  battery={:>7.1} kW (SoC={:.1}%) | \
             net={:>8.1} kW {:>7.1} kvar",
            self.step,
            self.time_hr,
            self.solar_kw,
            self.battery_kw,
            self.battery_soc * 100.0,
            self.net_p_kw,
            self.net_q_kvar,
        )?;
        if let Some(v) = self.voltage_pu {
            write!(f, "  V={v:.4} pu")?;
        }
        if let Some(price) = self.price_per_mwh {
            write!(f, "  price={price:.1} $/MWh")?;
        }
        if self.degraded {
            write!(f, "  [degraded]")?;
        }
        Ok(())
    }
}

/// Ordered, append-only record of a run.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    steps: Vec<StepResult>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: StepResult) {
        self.steps.push(result);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&StepResult> {
        self.steps.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StepResult> {
        self.steps.iter()
    }

    pub fn as_slice(&self) -> &[StepResult] {
        &self.steps
    }

    /// Number of steps flagged as degraded.
    pub fn degraded_count(&self) -> usize {
        self.steps.iter().filter(|s| s.degraded).count()
    }

    pub fn into_vec(self) -> Vec<StepResult> {
        self.steps
    }
}

impl<'a> IntoIterator for &'a RunLog {
    type Item = &'a StepResult;
    type IntoIter = std::slice::Iter<'a, StepResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}
