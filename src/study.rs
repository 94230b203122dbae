//! PV penetration sweep: voltage rise, reverse flow and curtailment on a
//! stylised feeder as installed PV grows relative to peak load.

use std::f64::consts::PI;

use crate::config::ConfigError;
use crate::devices::ClearSkyDay;
use crate::sim::power_balance::{is_reverse_flow, net_import_kw};

/// Voltage above which PV output is curtailed (pu).
pub const CURTAILMENT_THRESHOLD_PU: f64 = 1.05;

/// Finest sampling interval the sweep accepts (one second, in hours).
pub const MIN_STEP_HOURS: f64 = 1.0 / 3600.0;

/// Parameters of the sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct PenetrationStudy {
    /// Feeder peak load; PV capacity is expressed as a share of it (kW).
    pub base_load_kw: f64,
    /// PV capacity levels as a percentage of `base_load_kw`.
    pub levels_pct: Vec<f64>,
    /// Voltage change per kW of net import (pu/kW). Reverse flow raises voltage.
    pub voltage_sensitivity_pu_per_kw: f64,
    /// Sampling interval over the day (hours).
    pub step_hours: f64,
}

impl Default for PenetrationStudy {
    fn default() -> Self {
        Self {
            base_load_kw: 1000.0,
            levels_pct: vec![0.0, 25.0, 50.0, 75.0, 100.0, 125.0],
            voltage_sensitivity_pu_per_kw: 0.00005,
            step_hours: 1.0,
        }
    }
}

/// Outcome of one penetration level.
#[derive(Debug, Clone, PartialEq)]
pub struct PenetrationResult {
    pub penetration_pct: f64,
    pub pv_capacity_kw: f64,
    /// Largest |V - 1| over the day (%).
    pub max_voltage_deviation_pct: f64,
    pub reverse_flow_hours: f64,
    /// PV energy curtailed to hold voltage (kWh).
    pub curtailed_energy_kwh: f64,
    /// Lowest net load over the day (kW; negative means export).
    pub min_net_load_kw: f64,
}

/// Daily load shape used by the sweep (no evening bump).
fn load_multiplier(hour: f64) -> f64 {
    0.7 + 0.3 * (PI * (hour - 10.0) / 14.0).sin()
}

impl PenetrationStudy {
    /// Checks the sweep parameters.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.step_hours.is_finite()
            && (MIN_STEP_HOURS..=24.0).contains(&self.step_hours))
        {
            return Err(ConfigError::new(
                "study.step_hours",
                format!("must be in [{MIN_STEP_HOURS:.6}, 24]"),
            ));
        }
        if !(self.base_load_kw.is_finite() && self.base_load_kw > 0.0) {
            return Err(ConfigError::new("study.base_load_kw", "must be > 0"));
        }
        if !self.voltage_sensitivity_pu_per_kw.is_finite() {
            return Err(ConfigError::new(
                "study.voltage_sensitivity_pu_per_kw",
                "must be finite",
            ));
        }
        if let Some(level) = self.levels_pct.iter().find(|p| !(p.is_finite() && **p >= 0.0)) {
            return Err(ConfigError::new(
                "study.levels_pct",
                format!("{level} is not a valid level"),
            ));
        }
        Ok(())
    }

    /// Sample times over one day. Empty when `step_hours` is out of range.
    fn sample_hours(&self) -> impl Iterator<Item = f64> + '_ {
        let steps = if self.step_hours.is_finite() && self.step_hours >= MIN_STEP_HOURS {
            (24.0 / self.step_hours).round() as usize
        } else {
            0
        };
        (0..steps).map(move |i| i as f64 * self.step_hours)
    }

    /// Voltage at the given net import.
    pub fn voltage_pu(&self, net_load_kw: f64) -> f64 {
        1.0 - self.voltage_sensitivity_pu_per_kw * net_load_kw
    }

    /// Net load over the day at one penetration level, `(hour, kW)` pairs.
    pub fn net_load_profile(&self, penetration_pct: f64) -> Vec<(f64, f64)> {
        let pv_capacity = self.base_load_kw * penetration_pct / 100.0;
        let sun = ClearSkyDay::new(1000.0, 6.0, 18.0, 0);
        self.sample_hours()
            .map(|h| {
                let load = self.base_load_kw * load_multiplier(h);
                let pv = pv_capacity * sun.clear_sky_irradiance(h) / 1000.0;
                (h, net_import_kw(load, pv, 0.0))
            })
            .collect()
    }

    /// Evaluates one penetration level.
    pub fn evaluate(&self, penetration_pct: f64) -> PenetrationResult {
        let pv_capacity = self.base_load_kw * penetration_pct / 100.0;
        let sun = ClearSkyDay::new(1000.0, 6.0, 18.0, 0);

        let mut max_dev = 0.0_f64;
        let mut reverse_hours = 0.0;
        let mut curtailed = 0.0;
        let mut min_net = f64::INFINITY;
        for h in self.sample_hours() {
            let pv = pv_capacity * sun.clear_sky_irradiance(h) / 1000.0;
            let net = net_import_kw(self.base_load_kw * load_multiplier(h), pv, 0.0);
            let v = self.voltage_pu(net);

            max_dev = max_dev.max((v - 1.0).abs());
            min_net = min_net.min(net);
            if is_reverse_flow(net) {
                reverse_hours += self.step_hours;
            }
            if v > CURTAILMENT_THRESHOLD_PU {
                let share = ((v - CURTAILMENT_THRESHOLD_PU) / 0.05).min(1.0);
                curtailed += pv * share * self.step_hours;
            }
        }

        PenetrationResult {
            penetration_pct,
            pv_capacity_kw: pv_capacity,
            max_voltage_deviation_pct: max_dev * 100.0,
            reverse_flow_hours: reverse_hours,
            curtailed_energy_kwh: curtailed,
            min_net_load_kw: if min_net.is_finite() { min_net } else { 0.0 },
        }
    }

    /// Evaluates every configured level in order.
    pub fn run(&self) -> Vec<PenetrationResult> {
        self.levels_pct.iter().map(|&p| self.evaluate(p)).collect()
    }
}

/// Net load sorted from highest to lowest (load duration curve).
pub fn duration_curve(profile: &[(f64, f64)]) -> Vec<f64> {
    let mut values: Vec<f64> = profile.iter().map(|&(_, kw)| kw).collect();
    values.sort_by(|a, b| b.total_cmp(a));
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_penetration_never_reverses() {
        let r = PenetrationStudy::default().evaluate(0.0);
        assert_eq!(r.pv_capacity_kw, 0.0);
        assert_eq!(r.reverse_flow_hours, 0.0);
        assert_eq!(r.curtailed_energy_kwh, 0.0);
        assert!(r.min_net_load_kw > 0.0);
    }

    #[test]
    fn reverse_flow_grows_with_penetration() {
        let results = PenetrationStudy::default().run();
        assert_eq!(results.len(), 6);
        let hours: Vec<f64> = results.iter().map(|r| r.reverse_flow_hours).collect();
        assert!(hours.windows(2).all(|w| w[1] >= w[0]), "{hours:?}");
        assert!(hours[5] > 0.0);
        assert!(results[5].min_net_load_kw < 0.0);
    }

    #[test]
    fn stiff_feeder_curtails_at_high_penetration() {
        let study = PenetrationStudy {
            voltage_sensitivity_pu_per_kw: 0.0005,
            ..PenetrationStudy::default()
        };
        let results = study.run();
        assert_eq!(results[0].curtailed_energy_kwh, 0.0);
        assert!(results[5].curtailed_energy_kwh > 0.0);
    }

    #[test]
    fn voltage_model_is_linear_in_net_load() {
        let study = PenetrationStudy::default();
        assert_relative_eq!(study.voltage_pu(1000.0), 0.95);
        assert_relative_eq!(study.voltage_pu(-1000.0), 1.05);
    }

    #[test]
    fn rejects_sub_second_sampling() {
        let study = PenetrationStudy {
            step_hours: 1e-300,
            ..PenetrationStudy::default()
        };
        let err = study.validate().expect_err("too fine");
        assert_eq!(err.field, "study.step_hours");
        // an unvalidated study samples nothing instead of looping forever
        let r = study.evaluate(100.0);
        assert_eq!(r.reverse_flow_hours, 0.0);
        assert!(study.net_load_profile(100.0).is_empty());
    }

    #[test]
    fn default_study_is_valid() {
        assert!(PenetrationStudy::default().validate().is_ok());
        let negative = PenetrationStudy {
            levels_pct: vec![50.0, -10.0],
            ..PenetrationStudy::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn duration_curve_is_descending() {
        let study = PenetrationStudy {
            step_hours: 0.25,
            ..PenetrationStudy::default()
        };
        let profile = study.net_load_profile(100.0);
        assert_eq!(profile.len(), 96);
        let curve = duration_curve(&profile);
        assert!(curve.windows(2).all(|w| w[0] >= w[1]));
    }
}
