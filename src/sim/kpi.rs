//! Post-hoc KPI computation from a run log.

use std::fmt;

use super::types::StepResult;

/// Lower edge of the acceptable voltage band (pu).
pub const VOLTAGE_MIN_PU: f64 = 0.95;
/// Upper edge of the acceptable voltage band (pu).
pub const VOLTAGE_MAX_PU: f64 = 1.05;

/// Aggregate key performance indicators derived from a complete run.
///
/// Computed post-hoc from the step records so that reported metrics always
/// agree with the log. Step durations are taken from consecutive granted
/// times, so partial grants are weighted correctly.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiReport {
    /// Number of steps in the run.
    pub steps: usize,
    /// Peak feeder import (kW, positive).
    pub peak_import_kw: f64,
    /// Peak reverse flow (kW, positive magnitude).
    pub peak_export_kw: f64,
    /// Hours with net power flowing back toward transmission.
    pub reverse_flow_hours: f64,
    pub peak_solar_kw: f64,
    /// Solar energy delivered (kWh).
    pub solar_energy_kwh: f64,
    /// Total battery energy throughput (kWh, sum of |power| * dt).
    pub battery_throughput_kwh: f64,
    /// Battery equivalent full cycles (throughput / 2*capacity).
    pub battery_equivalent_full_cycles: f64,
    /// Reduction of the import peak attributable to storage (%).
    pub peak_reduction_pct: f64,
    /// Steps where the solver did not converge.
    pub degraded_steps: usize,
    pub voltage_min_pu: Option<f64>,
    pub voltage_max_pu: Option<f64>,
    /// Steps with voltage outside the acceptable band.
    pub voltage_violations: usize,
    /// Cost of net imports at the observed market price ($).
    pub energy_cost: f64,
}

impl KpiReport {
    /// Computes all KPIs from the step records.
    ///
    /// # Arguments
    ///
    /// * `results` - Step records in time order
    /// * `battery_capacity_kwh` - Fleet capacity for the cycle count
    pub fn from_results(results: &[StepResult], battery_capacity_kwh: f64) -> Self {
        let mut peak_import = 0.0_f64;
        let mut peak_export = 0.0_f64;
        let mut peak_without_storage = 0.0_f64;
        let mut reverse_hours = 0.0;
        let mut peak_solar = 0.0_f64;
        let mut solar_energy = 0.0;
        let mut throughput = 0.0;
        let mut v_min: Option<f64> = None;
        let mut v_max: Option<f64> = None;
        let mut v_violations = 0;
        let mut cost = 0.0;

        let mut previous_hr = 0.0;
        for r in results {
            let dt = (r.time_hr - previous_hr).max(0.0);
            previous_hr = r.time_hr;

            peak_import = peak_import.max(r.net_p_kw);
            peak_export = peak_export.max(-r.net_p_kw);
            peak_without_storage = peak_without_storage.max(r.net_p_kw - r.battery_kw);
            if r.net_p_kw < 0.0 {
                reverse_hours += dt;
            }

            peak_solar = peak_solar.max(r.solar_kw);
            solar_energy += r.solar_kw * dt;
            throughput += r.battery_kw.abs() * dt;

            if let Some(v) = r.voltage_pu {
                v_min = Some(v_min.map_or(v, |m| m.min(v)));
                v_max = Some(v_max.map_or(v, |m| m.max(v)));
                if !(VOLTAGE_MIN_PU..=VOLTAGE_MAX_PU).contains(&v) {
                    v_violations += 1;
                }
            }
            if let Some(price) = r.price_per_mwh {
                cost += r.net_p_kw * dt / 1000.0 * price;
            }
        }

        let cycles = if battery_capacity_kwh > 0.0 {
            throughput / (2.0 * battery_capacity_kwh)
        } else {
            0.0
        };
        let peak_reduction_pct = if peak_without_storage > 0.0 {
            100.0 * (peak_without_storage - peak_import) / peak_without_storage
        } else {
            0.0
        };

        Self {
            steps: results.len(),
            peak_import_kw: peak_import,
            peak_export_kw: peak_export,
            reverse_flow_hours: reverse_hours,
            peak_solar_kw: peak_solar,
            solar_energy_kwh: solar_energy,
            battery_throughput_kwh: throughput,
            battery_equivalent_full_cycles: cycles,
            peak_reduction_pct,
            degraded_steps: results.iter().filter(|r| r.degraded).count(),
            voltage_min_pu: v_min,
            voltage_max_pu: v_max,
            voltage_violations: v_violations,
            energy_cost: cost,
        }
    }
}

impl fmt::Display for KpiReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- KPI Report ---")?;
        writeln!(f, "Steps:                 {}", self.steps)?;
        writeln!(f, "Peak import:           {:.1} kW", self.peak_import_kw)?;
        writeln!(f, "Peak export:           {:.1} kW", self.peak_export_kw)?;
        writeln!(f, "Reverse flow:          {:.2} h", self.reverse_flow_hours)?;
        writeln!(
            f,
            "Solar:                 {:.1} kW peak, {:.1} kWh",
            self.peak_solar_kw, self.solar_energy_kwh
        )?;
        writeln!(
            f,
            "Battery throughput:    {:.1} kWh ({:.2} equiv. cycles)",
            self.battery_throughput_kwh, self.battery_equivalent_full_cycles
        )?;
        writeln!(f, "Peak reduction:        {:.1}%", self.peak_reduction_pct)?;
        match (self.voltage_min_pu, self.voltage_max_pu) {
            (Some(lo), Some(hi)) => writeln!(
                f,
                "Voltage:               {lo:.4}..{hi:.4} pu ({} out of band)",
                self.voltage_violations
            )?,
            _ => writeln!(f, "Voltage:               n/a")?,
        }
        writeln!(f, "Energy cost:           ${:.2}", self.energy_cost)?;
        write!(f, "Degraded steps:        {}", self.degraded_steps)
    }
}
