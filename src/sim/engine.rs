//! Co-simulation orchestrator: steps DER models in lockstep with a federation.

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ScenarioConfig, join_errors};
use crate::cosim::bus::{
    BATTERY_POWER, BusError, BusValue, MARKET_PRICE, MessageBus, SOLAR_GENERATION, TOTAL_POWER,
    TRANS_VOLTAGE, ValueKind,
};
use crate::devices::{BatteryUnit, ClearSkyDay, EnvironmentSource, SolarUnit};

use super::clock::TimeCursor;
use super::controller::{DispatchPolicy, DispatchView};
use super::feeder::{LoadShape, PowerFlowSolver, Setpoints};
use super::types::{ComplexPower, DispatchCommand, Phase, RunLog, StepResult};

/// Fatal run failure, tagged with the phase that failed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid configuration:\n{}", join_errors(.0))]
    Configuration(Vec<ConfigError>),
    #[error("initialization failed: {0}")]
    Initialization(#[source] BusError),
    #[error("execution failed at t={time_hr:.3}h: {source}")]
    Execution {
        time_hr: f64,
        #[source]
        source: BusError,
    },
    #[error("finalization failed: {0}")]
    Finalization(#[source] BusError),
    #[error("cannot {operation} while {phase}")]
    Phase {
        operation: &'static str,
        phase: Phase,
    },
}

impl RunError {
    /// Short name of the phase that failed.
    pub fn failed_phase(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Initialization(_) => "initialization",
            Self::Execution { .. } => "execution",
            Self::Finalization(_) => "finalization",
            Self::Phase { .. } => "lifecycle",
        }
    }
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(vec![e])
    }
}

/// Fixed parameters of a run that are not owned by any single model.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Multiplier applied to net power before it is published.
    pub scale_factor: f64,
    /// Retries for transient bus errors on a single call.
    pub max_retries: u32,
    /// Unscaled feeder load used for the dispatch load estimate (kW).
    pub base_load_kw: f64,
    pub load_shape: LoadShape,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            scale_factor: 20.0,
            max_retries: 3,
            base_load_kw: 0.0,
            load_shape: LoadShape::Flat,
        }
    }
}

/// Runs a bus call, retrying transient failures up to `max_retries` times.
fn with_retry<B, T>(
    bus: &mut B,
    max_retries: u32,
    call: &str,
    mut op: impl FnMut(&mut B) -> Result<T, BusError>,
) -> Result<T, BusError> {
    let mut attempt = 0;
    loop {
        match op(bus) {
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                warn!(call, attempt, max_retries, error = %e, "transient bus error, retrying");
            }
            other => return other,
        }
    }
}

/// Splits a fleet command across units in proportion to their power rating.
fn split_by_rating(batteries: &[BatteryUnit], command_kw: f64) -> Vec<DispatchCommand> {
    let total: f64 = batteries.iter().map(|b| b.spec().power_rating_kw).sum();
    batteries
        .iter()
        .enumerate()
        .map(|(unit, b)| DispatchCommand {
            unit,
            power_kw: if total > 0.0 {
                command_kw * b.spec().power_rating_kw / total
            } else {
                0.0
            },
        })
        .collect()
}

/// Energy-weighted state of charge of a battery fleet.
fn fleet_soc(batteries: &[BatteryUnit]) -> f64 {
    let capacity: f64 = batteries.iter().map(|b| b.spec().energy_capacity_kwh).sum();
    if capacity > 0.0 {
        batteries.iter().map(BatteryUnit::stored_energy_kwh).sum::<f64>() / capacity
    } else {
        0.0
    }
}

/// Co-simulation orchestrator owning the clock, the DER units, and the
/// external collaborators.
///
/// Generic over the bus, solver, policy and environment for static dispatch.
/// Each step runs in a fixed order: time grant, subscription read,
/// environment, solar, dispatch decision, battery mutation, power flow,
/// publish. Battery state for a step's
/// decision is exactly the state left by the previous step.
pub struct Orchestrator<B, S, P, E>
where
    B: MessageBus,
    S: PowerFlowSolver,
    P: DispatchPolicy,
    E: EnvironmentSource,
{
    settings: OrchestratorSettings,
    cursor: TimeCursor,
    solar: Vec<SolarUnit>,
    batteries: Vec<BatteryUnit>,
    bus: B,
    solver: S,
    policy: P,
    environment: E,
    log: RunLog,
    phase: Phase,
    last_net: ComplexPower,
}

impl<B, S, P, E> Orchestrator<B, S, P, E>
where
    B: MessageBus,
    S: PowerFlowSolver,
    P: DispatchPolicy,
    E: EnvironmentSource,
{
    /// Creates an orchestrator in the `Created` phase.
    ///
    /// # Arguments
    ///
    /// * `settings` - Scale factor, retry budget and load estimate
    /// * `cursor` - Time cursor positioned at the start of the run
    /// * `solar` - Solar units, evaluated in order
    /// * `batteries` - Battery units; the fleet command is split by rating
    /// * `bus` - Federation message bus
    /// * `solver` - Feeder power-flow solver
    /// * `policy` - Dispatch policy
    /// * `environment` - Irradiance and temperature source
    ///
    /// # Errors
    ///
    /// Returns `RunError::Configuration` if there is no battery or the scale
    /// factor is not positive.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        settings: OrchestratorSettings,
        cursor: TimeCursor,
        solar: Vec<SolarUnit>,
        batteries: Vec<BatteryUnit>,
        bus: B,
        solver: S,
        policy: P,
        environment: E,
    ) -> Result<Self, RunError> {
        let mut errors = Vec::new();
        if batteries.is_empty() {
            errors.push(ConfigError::new("battery", "at least one unit is required"));
        }
        if !(settings.scale_factor.is_finite() && settings.scale_factor > 0.0) {
            errors.push(ConfigError::new("cosim.scale_factor", "must be > 0"));
        }
        if !errors.is_empty() {
            return Err(RunError::Configuration(errors));
        }
        Ok(Self {
            settings,
            cursor,
            solar,
            batteries,
            bus,
            solver,
            policy,
            environment,
            log: RunLog::new(),
            phase: Phase::Created,
            last_net: ComplexPower::ZERO,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    pub fn into_log(self) -> RunLog {
        self.log
    }

    pub fn batteries(&self) -> &[BatteryUnit] {
        &self.batteries
    }

    pub fn solar(&self) -> &[SolarUnit] {
        &self.solar
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn cursor(&self) -> &TimeCursor {
        &self.cursor
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    fn expect_phase(&self, expected: Phase, operation: &'static str) -> Result<(), RunError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(RunError::Phase {
                operation,
                phase: self.phase,
            })
        }
    }

    fn join_federation(&mut self) -> Result<(), BusError> {
        let bus = &mut self.bus;
        bus.register_publication(TOTAL_POWER, ValueKind::Complex, "kW")?;
        bus.register_publication(SOLAR_GENERATION, ValueKind::Double, "kW")?;
        bus.register_publication(BATTERY_POWER, ValueKind::Double, "kW")?;
        bus.register_subscription(TRANS_VOLTAGE, "pu")?;
        bus.register_subscription(MARKET_PRICE, "$/MWh")?;
        with_retry(bus, self.settings.max_retries, "enter_executing_mode", |b| {
            b.enter_executing_mode()
        })
    }

    /// Releases the bus after a fatal error and moves to `Finalized`.
    fn abort(&mut self) {
        if let Err(e) = self.bus.finalize() {
            warn!(error = %e, "bus finalize after failure also failed");
        }
        self.phase = Phase::Finalized;
    }

    /// Registers channels and waits for the federation to enter execution.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Phase` outside `Created`, or
    /// `RunError::Initialization` if the bus refuses a registration or the
    /// federation never becomes ready. A failed initialization releases the
    /// bus and leaves the orchestrator `Finalized`.
    pub fn initialize(&mut self) -> Result<(), RunError> {
        self.expect_phase(Phase::Created, "initialize")?;
        self.phase = Phase::Initializing;
        info!(
            solar_units = self.solar.len(),
            battery_units = self.batteries.len(),
            policy = self.policy.name(),
            step_hr = self.cursor.step_hr(),
            stop_hr = self.cursor.stop_hr(),
            "initializing federate"
        );

        if let Err(e) = self.join_federation() {
            error!(error = %e, "initialization failed");
            self.abort();
            return Err(RunError::Initialization(e));
        }

        self.phase = Phase::Executing;
        info!("entered executing mode");
        Ok(())
    }

    /// Executes one step.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(result))` - The record appended to the log
    /// * `Ok(None)` - The stop time has been reached
    ///
    /// # Errors
    ///
    /// Returns `RunError::Phase` outside `Executing`, or
    /// `RunError::Execution` when the bus fails beyond its retry budget or
    /// grants a time that breaks ordering. An execution error is terminal:
    /// the bus is released and the orchestrator moves to `Finalized`.
    /// Solver non-convergence is not an error: the step is logged as
    /// degraded and holds the last net power.
    pub fn step(&mut self) -> Result<Option<StepResult>, RunError> {
        self.expect_phase(Phase::Executing, "step")?;
        let outcome = self.advance();
        if outcome.is_err() {
            self.abort();
        }
        outcome
    }

    fn advance(&mut self) -> Result<Option<StepResult>, RunError> {
        let Some(requested_hr) = self.cursor.next_request() else {
            return Ok(None);
        };
        let previous_hr = self.cursor.current_hr();
        let retries = self.settings.max_retries;
        let fatal = |source: BusError| {
            error!(time_hr = previous_hr, error = %source, "bus failure, aborting run");
            RunError::Execution {
                time_hr: previous_hr,
                source,
            }
        };

        // 1. Time grant
        let granted_hr = with_retry(&mut self.bus, retries, "request_time", |b| {
            b.request_time(requested_hr)
        })
        .map_err(fatal)?;
        let duration_hr = self.cursor.advance_to(requested_hr, granted_hr).map_err(|r| {
            fatal(BusError::TimeDenied {
                current_hr: r.current_hr,
                requested_hr: r.requested_hr,
                granted_hr: r.granted_hr,
            })
        })?;
        let hour_of_day = granted_hr.rem_euclid(24.0);
        let voltage_pu = self.bus.latest(TRANS_VOLTAGE).map(|v| v.as_f64());
        let price_per_mwh = self.bus.latest(MARKET_PRICE).map(|v| v.as_f64());

        // 2. Environment and solar
        let conditions = self.environment.sample(hour_of_day);
        let mut setpoints = Setpoints::new(self.settings.load_shape.multiplier(hour_of_day));
        let mut solar_kw = 0.0;
        for unit in &self.solar {
            let kw = unit.power_kw(conditions.irradiance_w_m2, conditions.ambient_temp_c);
            solar_kw += kw;
            setpoints.generators.insert(unit.site.clone(), kw);
        }

        // 3. Dispatch decision on the fleet aggregate
        let view = DispatchView {
            hour_of_day,
            solar_total_kw: solar_kw,
            net_load_estimate_kw: self.settings.base_load_kw * setpoints.load_multiplier,
            soc: fleet_soc(&self.batteries),
            power_rating_kw: self.batteries.iter().map(|b| b.spec().power_rating_kw).sum(),
        };
        let command_kw = self.policy.decide(&view);

        // 4. Battery mutation
        let mut battery_kw = 0.0;
        for cmd in split_by_rating(&self.batteries, command_kw) {
            let unit = &mut self.batteries[cmd.unit];
            let outcome = unit.charge_discharge(cmd.power_kw, duration_hr);
            battery_kw += outcome.actual_kw;
            setpoints.storage.insert(unit.site.clone(), outcome.actual_kw);
        }

        // 5. Power flow
        let (net, degraded) = match self.solver.solve(&setpoints) {
            Ok(solution) => {
                self.last_net = solution.feeder_head;
                (solution.feeder_head, false)
            }
            Err(e) => {
                warn!(time_hr = granted_hr, error = %e, "power flow did not converge, holding last net power");
                (self.last_net, true)
            }
        };

        // 6. Publish
        let published = net.scaled(self.settings.scale_factor);
        let outputs = [
            (TOTAL_POWER, BusValue::Complex(published)),
            (SOLAR_GENERATION, BusValue::Double(solar_kw)),
            (BATTERY_POWER, BusValue::Double(battery_kw)),
        ];
        for (channel, value) in outputs {
            with_retry(&mut self.bus, retries, "publish", |b| b.publish(channel, value))
                .map_err(fatal)?;
        }

        let result = StepResult {
            step: self.log.len(),
            time_hr: granted_hr,
            hour_of_day,
            solar_kw,
            battery_command_kw: command_kw,
            battery_kw,
            battery_soc: fleet_soc(&self.batteries),
            net_p_kw: net.p_kw,
            net_q_kvar: net.q_kvar,
            voltage_pu,
            price_per_mwh,
            degraded,
        };
        debug!(
            step = result.step,
            time_hr = granted_hr,
            solar_kw,
            command_kw,
            battery_kw,
            soc = result.battery_soc,
            net_p_kw = net.p_kw,
            degraded,
            "step complete"
        );
        self.log.push(result.clone());
        Ok(Some(result))
    }

    /// Drives a run to completion and finalizes.
    ///
    /// Initializes first if still `Created`. On a fatal error the bus is
    /// released before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first fatal `RunError`.
    pub fn run(&mut self) -> Result<&RunLog, RunError> {
        if self.phase == Phase::Created {
            self.initialize()?;
        }
        self.expect_phase(Phase::Executing, "run")?;
        while self.step()?.is_some() {}
        self.finalize()?;
        Ok(&self.log)
    }

    /// Ends the run at the current simulated time. A step in progress
    /// completes, publish included.
    pub fn stop_now(&mut self) {
        info!(time_hr = self.cursor.current_hr(), "stop requested");
        self.cursor.stop_now();
    }

    /// Releases the bus. Terminal.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Phase` if already finalized, or
    /// `RunError::Finalization` if the bus fails to close.
    pub fn finalize(&mut self) -> Result<(), RunError> {
        if self.phase == Phase::Finalized {
            return Err(RunError::Phase {
                operation: "finalize",
                phase: self.phase,
            });
        }
        self.phase = Phase::Finalized;
        self.bus.finalize().map_err(|e| {
            error!(error = %e, "finalization failed");
            RunError::Finalization(e)
        })?;
        info!(
            steps = self.log.len(),
            degraded = self.log.degraded_count(),
            time_hr = self.cursor.current_hr(),
            "federate finalized"
        );
        Ok(())
    }
}

impl<B, S, P> Orchestrator<B, S, P, ClearSkyDay>
where
    B: MessageBus,
    S: PowerFlowSolver,
    P: DispatchPolicy,
{
    /// Builds an orchestrator from a validated scenario.
    ///
    /// # Errors
    ///
    /// Returns `RunError::Configuration` with every validation error.
    pub fn from_config(
        config: &ScenarioConfig,
        bus: B,
        solver: S,
        policy: P,
    ) -> Result<Self, RunError> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(RunError::Configuration(errors));
        }
        let settings = OrchestratorSettings {
            scale_factor: config.cosim.scale_factor,
            max_retries: config.cosim.max_retries,
            base_load_kw: config.feeder.total_load_kw(),
            load_shape: config.feeder.load_shape,
        };
        let cursor = TimeCursor::new(config.simulation.step_hours, config.simulation.stop_hours)?;
        Self::new(
            settings,
            cursor,
            config.solar_units()?,
            config.battery_units()?,
            bus,
            solver,
            policy,
            config.environment_source(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosim::InProcessBus;
    use crate::devices::{BatterySpec, Conditions, FixedConditions};
    use crate::sim::controller::ThresholdPolicy;
    use crate::sim::feeder::{ConvergenceError, FlowSolution, LumpedFeeder};
    use approx::assert_relative_eq;

    /// Solver that fails on chosen call indices and otherwise reports load only.
    struct FlakySolver {
        calls: usize,
        fail_on: Vec<usize>,
    }

    impl PowerFlowSolver for FlakySolver {
        fn solve(&mut self, setpoints: &Setpoints) -> Result<FlowSolution, ConvergenceError> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_on.contains(&call) {
                return Err(ConvergenceError::Diverged(format!("call {call}")));
            }
            let gen_kw: f64 = setpoints.generators.values().sum();
            let storage_kw: f64 = setpoints.storage.values().sum();
            Ok(FlowSolution {
                feeder_head: ComplexPower::new(1000.0 - gen_kw + storage_kw, 100.0),
            })
        }
    }

    /// Bus whose voltage changes as soon as net power is published, so a
    /// read after publish differs from a read after the grant.
    struct PublishEchoBus {
        inner: InProcessBus,
        voltage_pu: Option<f64>,
    }

    impl MessageBus for PublishEchoBus {
        fn register_publication(
            &mut self,
            name: &str,
            kind: ValueKind,
            units: &str,
        ) -> Result<(), BusError> {
            self.inner.register_publication(name, kind, units)
        }

        fn register_subscription(&mut self, name: &str, units: &str) -> Result<(), BusError> {
            self.inner.register_subscription(name, units)
        }

        fn enter_executing_mode(&mut self) -> Result<(), BusError> {
            self.inner.enter_executing_mode()
        }

        fn request_time(&mut self, time_hr: f64) -> Result<f64, BusError> {
            self.inner.request_time(time_hr)
        }

        fn publish(&mut self, name: &str, value: BusValue) -> Result<(), BusError> {
            if name == TOTAL_POWER {
                self.voltage_pu = Some(1.02);
            }
            self.inner.publish(name, value)
        }

        fn latest(&self, name: &str) -> Option<BusValue> {
            if name == TRANS_VOLTAGE {
                self.voltage_pu.map(BusValue::Double)
            } else {
                self.inner.latest(name)
            }
        }

        fn finalize(&mut self) -> Result<(), BusError> {
            self.inner.finalize()
        }
    }

    fn battery(site: &str, rating: f64, capacity: f64) -> BatteryUnit {
        let spec = BatterySpec {
            power_rating_kw: rating,
            energy_capacity_kwh: capacity,
            round_trip_efficiency: 0.95,
            soc_min: 0.1,
            soc_max: 0.9,
        };
        BatteryUnit::new(site, spec, 0.5).expect("valid battery")
    }

    fn night() -> FixedConditions {
        FixedConditions(Conditions {
            irradiance_w_m2: 0.0,
            ambient_temp_c: 15.0,
        })
    }

    fn orchestrator<S: PowerFlowSolver>(
        solver: S,
        stop_hr: f64,
    ) -> Orchestrator<InProcessBus, S, ThresholdPolicy, FixedConditions> {
        orchestrator_with_policy(solver, stop_hr, ThresholdPolicy::default())
    }

    fn orchestrator_with_policy<S: PowerFlowSolver>(
        solver: S,
        stop_hr: f64,
        policy: ThresholdPolicy,
    ) -> Orchestrator<InProcessBus, S, ThresholdPolicy, FixedConditions> {
        let solar = vec![SolarUnit::new("PV1", 200.0, 0.2, -0.004).expect("valid pv")];
        Orchestrator::new(
            OrchestratorSettings {
                base_load_kw: 1000.0,
                ..OrchestratorSettings::default()
            },
            TimeCursor::new(0.25, stop_hr).expect("valid cursor"),
            solar,
            vec![battery("Battery1", 100.0, 400.0)],
            InProcessBus::new("DER_Test"),
            solver,
            policy,
            night(),
        )
        .expect("valid orchestrator")
    }

    fn flaky(fail_on: Vec<usize>) -> FlakySolver {
        FlakySolver { calls: 0, fail_on }
    }

    #[test]
    fn requires_a_battery() {
        let result = Orchestrator::new(
            OrchestratorSettings::default(),
            TimeCursor::new(0.25, 1.0).expect("valid cursor"),
            Vec::new(),
            Vec::new(),
            InProcessBus::new("DER_Test"),
            flaky(Vec::new()),
            ThresholdPolicy::default(),
            night(),
        );
        assert!(matches!(result, Err(RunError::Configuration(_))));
    }

    #[test]
    fn step_before_initialize_is_a_phase_error() {
        let mut orch = orchestrator(flaky(Vec::new()), 1.0);
        let err = orch.step().expect_err("not executing yet");
        assert!(matches!(
            err,
            RunError::Phase {
                phase: Phase::Created,
                ..
            }
        ));
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut orch = orchestrator(flaky(Vec::new()), 1.0);
        assert_eq!(orch.phase(), Phase::Created);
        orch.initialize().expect("initialize");
        assert_eq!(orch.phase(), Phase::Executing);
        assert!(orch.initialize().is_err());
        orch.finalize().expect("finalize");
        assert_eq!(orch.phase(), Phase::Finalized);
        assert!(orch.finalize().is_err());
        assert!(orch.step().is_err());
    }

    #[test]
    fn run_produces_one_record_per_grant() {
        let mut orch = orchestrator(flaky(Vec::new()), 2.0);
        let log = orch.run().expect("run completes");
        assert_eq!(log.len(), 8);
        let times: Vec<f64> = log.iter().map(|s| s.time_hr).collect();
        assert!(times.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(times.last().copied(), Some(2.0));
        assert_eq!(orch.phase(), Phase::Finalized);
        assert!(orch.bus().is_finalized());
    }

    #[test]
    fn degraded_step_holds_last_net_power() {
        let mut orch = orchestrator(flaky(vec![2]), 1.0);
        orch.run().expect("non-convergence is not fatal");
        let log = orch.log().as_slice();
        assert_eq!(log.len(), 4);
        assert!(!log[1].degraded);
        assert!(log[2].degraded);
        assert_eq!(log[2].net_p_kw, log[1].net_p_kw);
        assert!(!log[3].degraded);
        assert_eq!(orch.log().degraded_count(), 1);
    }

    #[test]
    fn first_step_degraded_publishes_zero() {
        let mut orch = orchestrator(flaky(vec![0]), 0.25);
        orch.run().expect("run completes");
        let log = orch.log().as_slice();
        assert!(log[0].degraded);
        assert_eq!(log[0].net_p_kw, 0.0);
    }

    #[test]
    fn publishes_scaled_net_power() {
        let mut orch = orchestrator(flaky(Vec::new()), 0.5);
        orch.run().expect("run completes");
        let net = orch.log().as_slice()[0].net_p_kw;
        let published = orch.bus().published(TOTAL_POWER);
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].as_f64(), net * 20.0);
        assert_eq!(orch.bus().published(SOLAR_GENERATION)[0], BusValue::Double(0.0));
    }

    #[test]
    fn transient_errors_are_retried() {
        let mut orch = orchestrator(flaky(Vec::new()), 0.5);
        orch.initialize().expect("initialize");
        orch.bus_mut()
            .queue_request_error(BusError::Timeout("slow".into()));
        orch.bus_mut()
            .queue_request_error(BusError::Timeout("slow".into()));
        assert!(orch.step().expect("retried").is_some());
    }

    #[test]
    fn retry_budget_exhaustion_is_fatal() {
        let mut orch = orchestrator(flaky(Vec::new()), 1.0);
        orch.initialize().expect("initialize");
        for _ in 0..4 {
            orch.bus_mut()
                .queue_request_error(BusError::Timeout("slow".into()));
        }
        let err = orch.run().expect_err("fatal");
        assert_eq!(err.failed_phase(), "execution");
        assert!(orch.log().is_empty());
        assert_eq!(orch.phase(), Phase::Finalized);
    }

    #[test]
    fn transport_failure_is_fatal_without_retry() {
        let mut orch = orchestrator(flaky(Vec::new()), 1.0);
        orch.initialize().expect("initialize");
        orch.step().expect("first step");
        orch.bus_mut()
            .queue_request_error(BusError::Transport("connection reset".into()));
        match orch.step() {
            Err(RunError::Execution { time_hr, source }) => {
                assert_eq!(time_hr, 0.25);
                assert!(matches!(source, BusError::Transport(_)));
            }
            other => panic!("expected execution error, got {other:?}"),
        }
        assert_eq!(orch.log().len(), 1);
        assert_eq!(orch.phase(), Phase::Finalized);
        assert!(orch.bus().is_finalized());

        let soc = orch.batteries()[0].soc();
        let err = orch.step().expect_err("no steps after a fatal error");
        assert!(matches!(
            err,
            RunError::Phase {
                operation: "step",
                phase: Phase::Finalized,
            }
        ));
        assert_eq!(orch.batteries()[0].soc(), soc);
        assert_eq!(orch.log().len(), 1);
    }

    #[test]
    fn failed_initialization_releases_the_bus() {
        let mut orch = orchestrator(flaky(Vec::new()), 1.0);
        orch.bus_mut().finalize().expect("close bus");
        let err = orch.run().expect_err("registration refused");
        assert_eq!(err.failed_phase(), "initialization");
        assert_eq!(orch.phase(), Phase::Finalized);
        assert!(orch.bus().is_finalized());
        assert!(orch.step().is_err());
    }

    #[test]
    fn subscriptions_are_read_right_after_the_grant() {
        let bus = PublishEchoBus {
            inner: InProcessBus::new("DER_Test"),
            voltage_pu: None,
        };
        let mut orch = Orchestrator::new(
            OrchestratorSettings::default(),
            TimeCursor::new(0.25, 0.5).expect("valid cursor"),
            Vec::new(),
            vec![battery("Battery1", 100.0, 400.0)],
            bus,
            flaky(Vec::new()),
            ThresholdPolicy::default(),
            night(),
        )
        .expect("valid orchestrator");
        orch.run().expect("run");
        let log = orch.log().as_slice();
        assert_eq!(log[0].voltage_pu, None);
        assert_eq!(log[1].voltage_pu, Some(1.02));
    }

    #[test]
    fn short_grant_shortens_the_battery_step() {
        let all_day_peak = ThresholdPolicy {
            peak_start_hour: 0.0,
            peak_end_hour: 24.0,
            ..ThresholdPolicy::default()
        };
        let mut orch = orchestrator_with_policy(flaky(Vec::new()), 1.0, all_day_peak);
        orch.initialize().expect("initialize");
        orch.bus_mut().queue_short_grant(0.15);

        let first = orch.step().expect("step").expect("record");
        assert_relative_eq!(first.time_hr, 0.1, epsilon = 1e-12);
        assert_eq!(first.battery_kw, -80.0);
        let drawn_kwh = 80.0 * 0.1 / 0.95_f64.sqrt();
        assert_relative_eq!(first.battery_soc, 0.5 - drawn_kwh / 400.0, epsilon = 1e-12);

        // the next request starts from the shortened grant
        let second = orch.step().expect("step").expect("record");
        assert_relative_eq!(second.time_hr, 0.35, epsilon = 1e-12);
        assert_relative_eq!(
            first.battery_soc - second.battery_soc,
            80.0 * 0.25 / 0.95_f64.sqrt() / 400.0,
            epsilon = 1e-12
        );

        orch.run().expect("finishes");
        let times: Vec<f64> = orch.log().iter().map(|r| r.time_hr).collect();
        assert!(times.windows(2).all(|w| w[1] > w[0]), "{times:?}");
        assert_relative_eq!(*times.last().expect("steps"), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn stop_now_ends_after_current_step() {
        let mut orch = orchestrator(flaky(Vec::new()), 24.0);
        orch.initialize().expect("initialize");
        orch.step().expect("step");
        orch.step().expect("step");
        orch.stop_now();
        assert!(orch.step().expect("no more steps").is_none());
        orch.finalize().expect("finalize");
        assert_eq!(orch.log().len(), 2);
        assert_eq!(orch.cursor().current_hr(), 0.5);
    }

    #[test]
    fn evening_peak_discharges_fleet() {
        let mut orch = orchestrator(flaky(Vec::new()), 20.0);
        orch.run().expect("run completes");
        let log = orch.log();
        let peak = log
            .iter()
            .find(|s| s.time_hr == 17.5)
            .expect("step at 17:30");
        assert_eq!(peak.battery_command_kw, -80.0);
        assert_eq!(peak.battery_kw, -80.0);
        // idle overnight: no surplus and outside the peak window
        assert!(log.iter().filter(|s| s.time_hr < 17.0).all(|s| s.battery_kw == 0.0));
        // discharge stops once the floor is reached
        assert!(log.iter().all(|s| s.battery_soc >= 0.1 - 1e-12));
    }

    #[test]
    fn fleet_command_is_split_by_rating() {
        let fleet = vec![battery("A", 100.0, 400.0), battery("B", 50.0, 200.0)];
        let cmds = split_by_rating(&fleet, -90.0);
        assert_eq!(cmds[0].power_kw, -60.0);
        assert_eq!(cmds[1].power_kw, -30.0);
        assert_eq!(fleet_soc(&fleet), 0.5);
    }

    #[test]
    fn lumped_feeder_drives_a_full_day() {
        let mut feeder = LumpedFeeder::new("DER_Test", Vec::new());
        feeder.register_generator("PV1");
        feeder.register_storage("Battery1");
        let mut orch = orchestrator(feeder, 24.0);
        orch.run().expect("run completes");
        assert_eq!(orch.log().len(), 96);
        assert_eq!(orch.solver().solves(), 96);
    }
}
