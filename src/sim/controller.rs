//! Battery dispatch policies.

use serde::Deserialize;

/// Aggregate state handed to a dispatch policy once per step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchView {
    /// Hour of day in `[0, 24)`.
    pub hour_of_day: f64,
    /// Total solar generation this step (kW, >= 0).
    pub solar_total_kw: f64,
    /// Estimated feeder load served before DER (kW).
    pub net_load_estimate_kw: f64,
    /// Energy-weighted fleet state of charge.
    pub soc: f64,
    /// Combined battery power rating (kW).
    pub power_rating_kw: f64,
}

impl DispatchView {
    /// Generation in excess of load (kW; negative when load dominates).
    pub fn excess_generation_kw(&self) -> f64 {
        self.solar_total_kw - self.net_load_estimate_kw
    }
}

/// Maps the current aggregate state to a battery power command.
///
/// Implementations are pure decision functions: they hold configuration only
/// and must not depend on call history.
pub trait DispatchPolicy {
    /// Returns the signed fleet command (kW; positive=charge, negative=discharge).
    fn decide(&self, view: &DispatchView) -> f64;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

impl<P: DispatchPolicy + ?Sized> DispatchPolicy for Box<P> {
    fn decide(&self, view: &DispatchView) -> f64 {
        (**self).decide(view)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

fn within(hour: f64, start: f64, end: f64) -> bool {
    (start..=end).contains(&hour)
}

fn cap(command_kw: f64, rating_kw: f64) -> f64 {
    command_kw.clamp(-rating_kw.max(0.0), rating_kw.max(0.0))
}

/// Threshold controller: absorb surplus generation first, otherwise shave the
/// evening peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    /// Surplus above which the fleet starts charging (kW).
    pub excess_threshold_kw: f64,
    /// Upper bound on the charge command (kW).
    pub max_charge_kw: f64,
    /// Charging is allowed only below this SOC.
    pub charge_soc_ceiling: f64,
    /// Start of the evening peak (hour, inclusive).
    pub peak_start_hour: f64,
    /// End of the evening peak (hour, inclusive).
    pub peak_end_hour: f64,
    /// Discharge command magnitude during the peak (kW).
    pub discharge_kw: f64,
    /// Discharging is allowed only above this SOC.
    pub discharge_soc_floor: f64,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            excess_threshold_kw: 0.0,
            max_charge_kw: 50.0,
            charge_soc_ceiling: 0.8,
            peak_start_hour: 17.0,
            peak_end_hour: 21.0,
            discharge_kw: 80.0,
            discharge_soc_floor: 0.2,
        }
    }
}

impl DispatchPolicy for ThresholdPolicy {
    fn decide(&self, view: &DispatchView) -> f64 {
        let surplus_kw = view.excess_generation_kw() - self.excess_threshold_kw;
        let command = if surplus_kw > 0.0 && view.soc < self.charge_soc_ceiling {
            surplus_kw.min(self.max_charge_kw)
        } else if within(view.hour_of_day, self.peak_start_hour, self.peak_end_hour)
            && view.soc > self.discharge_soc_floor
        {
            -self.discharge_kw
        } else {
            0.0
        };
        cap(command, view.power_rating_kw)
    }

    fn name(&self) -> &'static str {
        "threshold"
    }
}

/// Time-of-day arbitrage: charge overnight, discharge through the day.
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitragePolicy {
    /// Charging windows, inclusive start and exclusive end (hours).
    pub charge_windows: Vec<(f64, f64)>,
    /// Charge command (kW, positive).
    pub charge_kw: f64,
    /// Discharge window, inclusive start and exclusive end (hours).
    pub discharge_window: (f64, f64),
    /// Discharge command magnitude (kW, positive).
    pub discharge_kw: f64,
}

impl Default for ArbitragePolicy {
    fn default() -> Self {
        Self {
            charge_windows: vec![(0.0, 6.0), (22.0, 24.0)],
            charge_kw: 40.0,
            discharge_window: (10.0, 20.0),
            discharge_kw: 30.0,
        }
    }
}

impl DispatchPolicy for ArbitragePolicy {
    fn decide(&self, view: &DispatchView) -> f64 {
        let h = view.hour_of_day;
        let command = if self.charge_windows.iter().any(|&(s, e)| h >= s && h < e) {
            self.charge_kw
        } else if h >= self.discharge_window.0 && h < self.discharge_window.1 {
            -self.discharge_kw
        } else {
            0.0
        };
        cap(command, view.power_rating_kw)
    }

    fn name(&self) -> &'static str {
        "arbitrage"
    }
}

/// Policy selector used by scenario configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// [`ThresholdPolicy`]
    #[default]
    Threshold,
    /// [`ArbitragePolicy`]
    Arbitrage,
}

impl PolicyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Threshold => "threshold",
            Self::Arbitrage => "arbitrage",
        }
    }
}
