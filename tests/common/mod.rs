//! Shared fixtures for integration tests.

use der_cosim::config::ScenarioConfig;
use der_cosim::cosim::InProcessBus;
use der_cosim::devices::ClearSkyDay;
use der_cosim::runner::in_process_bus;
use der_cosim::sim::controller::DispatchPolicy;
use der_cosim::sim::engine::Orchestrator;
use der_cosim::sim::feeder::LumpedFeeder;

/// Orchestrator type produced from a scenario file or preset.
pub type ScenarioOrchestrator =
    Orchestrator<InProcessBus, LumpedFeeder, Box<dyn DispatchPolicy>, ClearSkyDay>;

/// Baseline scenario stopped at `stop_hours`.
pub fn baseline_until(stop_hours: f64) -> ScenarioConfig {
    let mut cfg = ScenarioConfig::baseline();
    cfg.simulation.stop_hours = stop_hours;
    cfg
}

/// Orchestrator on the standard in-process federation for `config`.
pub fn orchestrator(config: &ScenarioConfig) -> ScenarioOrchestrator {
    orchestrator_with_bus(config, in_process_bus(&config.cosim))
}

/// Orchestrator on a caller-prepared bus, e.g. one with queued faults.
pub fn orchestrator_with_bus(config: &ScenarioConfig, bus: InProcessBus) -> ScenarioOrchestrator {
    Orchestrator::from_config(
        config,
        bus,
        config.lumped_feeder(),
        config.dispatch.build_policy(),
    )
    .expect("scenario should be valid")
}
