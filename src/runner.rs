//! One-call scenario execution on the in-process federation.

use tracing::info;

use crate::config::{CosimConfig, ScenarioConfig};
use crate::cosim::{InProcessBus, PriceCurve, TransmissionProxy};
use crate::sim::engine::{Orchestrator, RunError};
use crate::sim::kpi::KpiReport;
use crate::sim::types::RunLog;

/// Everything a finished run hands back to the caller.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub log: RunLog,
    pub kpi: KpiReport,
    /// Fleet SOC at the end of the run.
    pub final_soc: Vec<(String, f64)>,
}

/// Builds the in-process federation with a transmission proxy and a price
/// source attached.
pub fn in_process_bus(cosim: &CosimConfig) -> InProcessBus {
    InProcessBus::new(cosim.federate_name.clone())
        .with_peer(TransmissionProxy::new(
            cosim.voltage_base_pu,
            cosim.voltage_sensitivity_pu_per_kw,
        ))
        .with_peer(PriceCurve {
            base_per_mwh: cosim.price_base_per_mwh,
            peak_adder_per_mwh: cosim.price_peak_adder_per_mwh,
            peak_window: (cosim.price_peak_start_hour, cosim.price_peak_end_hour),
        })
}

/// Runs a scenario end to end against the lumped feeder and the in-process
/// federation.
///
/// # Errors
///
/// Returns a `RunError` identifying the phase that failed.
pub fn run_scenario(config: &ScenarioConfig) -> Result<RunSummary, RunError> {
    let mut orchestrator = Orchestrator::from_config(
        config,
        in_process_bus(&config.cosim),
        config.lumped_feeder(),
        config.dispatch.build_policy(),
    )?;
    orchestrator.run()?;

    let capacity: f64 = config.battery.iter().map(|b| b.energy_capacity_kwh).sum();
    let final_soc = orchestrator
        .batteries()
        .iter()
        .map(|b| (b.site.clone(), b.soc()))
        .collect();
    let log = orchestrator.into_log();
    let kpi = KpiReport::from_results(log.as_slice(), capacity);
    info!(steps = log.len(), degraded = kpi.degraded_steps, "scenario complete");
    Ok(RunSummary {
        log,
        kpi,
        final_soc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_runs_a_full_day() {
        let summary = run_scenario(&ScenarioConfig::baseline()).expect("baseline runs");
        assert_eq!(summary.log.len(), 96);
        assert_eq!(summary.kpi.degraded_steps, 0);
        assert_eq!(summary.final_soc.len(), 1);
        // voltage appears once the feeder has published
        assert!(summary.log.as_slice()[0].voltage_pu.is_none());
        assert!(summary.log.as_slice()[1].voltage_pu.is_some());
        assert!(summary.log.iter().all(|s| s.price_per_mwh.is_some()));
    }

    #[test]
    fn invalid_scenario_fails_in_configuration() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.simulation.step_hours = -1.0;
        let err = run_scenario(&cfg).expect_err("invalid");
        assert_eq!(err.failed_phase(), "configuration");
    }
}
