//! TOML-based scenario configuration and preset definitions.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::devices::{BatterySpec, BatteryUnit, ClearSkyDay, SolarUnit};
use crate::sim::controller::{ArbitragePolicy, DispatchPolicy, PolicyKind, ThresholdPolicy};
use crate::sim::feeder::{FeederLoad, LoadShape, LumpedFeeder};

/// Top-level scenario configuration parsed from TOML.
///
/// All fields have defaults matching the baseline scenario: two PV arrays and
/// one battery on a three-load feeder, stepped in quarter hours for one day.
/// Load from TOML with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation timing and global parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Irradiance and temperature model.
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Solar PV units (`[[solar]]` tables).
    #[serde(default = "default_solar")]
    pub solar: Vec<SolarConfig>,
    /// Battery units (`[[battery]]` tables).
    #[serde(default = "default_battery")]
    pub battery: Vec<BatteryConfig>,
    /// Dispatch policy parameters.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Feeder loads and solver limits.
    #[serde(default)]
    pub feeder: FeederConfig,
    /// Co-simulation exchange parameters.
    #[serde(default)]
    pub cosim: CosimConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            environment: EnvironmentConfig::default(),
            solar: default_solar(),
            battery: default_battery(),
            dispatch: DispatchConfig::default(),
            feeder: FeederConfig::default(),
            cosim: CosimConfig::default(),
        }
    }
}

/// Simulation timing and global parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Requested step size in hours (must be > 0).
    pub step_hours: f64,
    /// Simulated stop time in hours (must be >= 0).
    pub stop_hours: f64,
    /// Master random seed.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_hours: 0.25,
            stop_hours: 24.0,
            seed: 42,
        }
    }
}

/// Irradiance and temperature model parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentConfig {
    /// Clear-sky irradiance at solar noon (W/m²).
    pub peak_irradiance_w_m2: f64,
    pub sunrise_hour: f64,
    pub sunset_hour: f64,
    /// Mean ambient temperature (°C).
    pub temp_base_c: f64,
    /// Diurnal temperature swing (°C).
    pub temp_amplitude_c: f64,
    /// Enables random cloud cover inside the cloud window.
    pub clouds: bool,
    pub cloud_start_hour: f64,
    pub cloud_end_hour: f64,
    /// Lowest irradiance multiplier under cloud (0.0-1.0).
    pub cloud_min_factor: f64,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            peak_irradiance_w_m2: 1000.0,
            sunrise_hour: 6.0,
            sunset_hour: 18.0,
            temp_base_c: 20.0,
            temp_amplitude_c: 10.0,
            clouds: true,
            cloud_start_hour: 10.0,
            cloud_end_hour: 14.0,
            cloud_min_factor: 0.7,
        }
    }
}

/// One solar PV unit.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolarConfig {
    /// Site identifier passed to the solver.
    pub site: String,
    /// Rated AC output (kW).
    pub rated_kw: f64,
    /// Panel efficiency (0.0-1.0).
    #[serde(default = "default_panel_efficiency")]
    pub efficiency: f64,
    /// Power temperature coefficient (fraction per °C).
    #[serde(default = "default_temp_coeff")]
    pub temp_coeff_per_c: f64,
}

fn default_panel_efficiency() -> f64 {
    0.20
}

fn default_temp_coeff() -> f64 {
    -0.004
}

fn default_solar() -> Vec<SolarConfig> {
    vec![
        SolarConfig {
            site: "PV1".to_string(),
            rated_kw: 200.0,
            efficiency: default_panel_efficiency(),
            temp_coeff_per_c: default_temp_coeff(),
        },
        SolarConfig {
            site: "PV2".to_string(),
            rated_kw: 500.0,
            efficiency: default_panel_efficiency(),
            temp_coeff_per_c: default_temp_coeff(),
        },
    ]
}

/// One battery storage unit.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatteryConfig {
    /// Site identifier passed to the solver.
    pub site: String,
    /// Symmetric charge/discharge limit (kW).
    pub power_rating_kw: f64,
    /// Energy capacity (kWh).
    pub energy_capacity_kwh: f64,
    /// Round-trip efficiency (0.0-1.0).
    #[serde(default = "default_round_trip")]
    pub round_trip_efficiency: f64,
    #[serde(default = "default_soc_min")]
    pub soc_min: f64,
    #[serde(default = "default_soc_max")]
    pub soc_max: f64,
    #[serde(default = "default_initial_soc")]
    pub initial_soc: f64,
}

fn default_round_trip() -> f64 {
    0.95
}

fn default_soc_min() -> f64 {
    0.1
}

fn default_soc_max() -> f64 {
    0.9
}

fn default_initial_soc() -> f64 {
    0.5
}

fn default_battery() -> Vec<BatteryConfig> {
    vec![BatteryConfig {
        site: "Battery1".to_string(),
        power_rating_kw: 100.0,
        energy_capacity_kwh: 400.0,
        round_trip_efficiency: default_round_trip(),
        soc_min: default_soc_min(),
        soc_max: default_soc_max(),
        initial_soc: default_initial_soc(),
    }]
}

impl BatteryConfig {
    pub fn spec(&self) -> BatterySpec {
        BatterySpec {
            power_rating_kw: self.power_rating_kw,
            energy_capacity_kwh: self.energy_capacity_kwh,
            round_trip_efficiency: self.round_trip_efficiency,
            soc_min: self.soc_min,
            soc_max: self.soc_max,
        }
    }
}

/// Dispatch policy selection and parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// `"threshold"` or `"arbitrage"`.
    pub policy: PolicyKind,
    /// Surplus generation above which charging starts (kW).
    pub excess_threshold_kw: f64,
    pub max_charge_kw: f64,
    pub charge_soc_ceiling: f64,
    pub peak_start_hour: f64,
    pub peak_end_hour: f64,
    pub discharge_kw: f64,
    pub discharge_soc_floor: f64,
    /// Arbitrage charging windows as `[start, end)` hour pairs.
    pub arbitrage_charge_windows: Vec<[f64; 2]>,
    pub arbitrage_charge_kw: f64,
    /// Arbitrage discharge window as a `[start, end)` hour pair.
    pub arbitrage_discharge_window: [f64; 2],
    pub arbitrage_discharge_kw: f64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        let threshold = ThresholdPolicy::default();
        let arbitrage = ArbitragePolicy::default();
        Self {
            policy: PolicyKind::Threshold,
            excess_threshold_kw: threshold.excess_threshold_kw,
            max_charge_kw: threshold.max_charge_kw,
            charge_soc_ceiling: threshold.charge_soc_ceiling,
            peak_start_hour: threshold.peak_start_hour,
            peak_end_hour: threshold.peak_end_hour,
            discharge_kw: threshold.discharge_kw,
            discharge_soc_floor: threshold.discharge_soc_floor,
            arbitrage_charge_windows: arbitrage
                .charge_windows
                .iter()
                .map(|&(s, e)| [s, e])
                .collect(),
            arbitrage_charge_kw: arbitrage.charge_kw,
            arbitrage_discharge_window: [arbitrage.discharge_window.0, arbitrage.discharge_window.1],
            arbitrage_discharge_kw: arbitrage.discharge_kw,
        }
    }
}

impl DispatchConfig {
    pub fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy {
            excess_threshold_kw: self.excess_threshold_kw,
            max_charge_kw: self.max_charge_kw,
            charge_soc_ceiling: self.charge_soc_ceiling,
            peak_start_hour: self.peak_start_hour,
            peak_end_hour: self.peak_end_hour,
            discharge_kw: self.discharge_kw,
            discharge_soc_floor: self.discharge_soc_floor,
        }
    }

    pub fn arbitrage_policy(&self) -> ArbitragePolicy {
        ArbitragePolicy {
            charge_windows: self
                .arbitrage_charge_windows
                .iter()
                .map(|w| (w[0], w[1]))
                .collect(),
            charge_kw: self.arbitrage_charge_kw,
            discharge_window: (
                self.arbitrage_discharge_window[0],
                self.arbitrage_discharge_window[1],
            ),
            discharge_kw: self.arbitrage_discharge_kw,
        }
    }

    /// Builds the configured policy.
    pub fn build_policy(&self) -> Box<dyn DispatchPolicy> {
        match self.policy {
            PolicyKind::Threshold => Box::new(self.threshold_policy()),
            PolicyKind::Arbitrage => Box::new(self.arbitrage_policy()),
        }
    }
}

/// One fixed feeder load.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadConfig {
    pub site: String,
    pub kw: f64,
    #[serde(default)]
    pub kvar: f64,
}

/// Feeder loads and solver limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeederConfig {
    pub name: String,
    pub loads: Vec<LoadConfig>,
    /// `"flat"` or `"residential"`.
    pub load_shape: LoadShape,
    /// Apparent power above which the solver reports non-convergence (kVA).
    pub max_apparent_kva: Option<f64>,
}

impl Default for FeederConfig {
    fn default() -> Self {
        let load = |site: &str, kw: f64, kvar: f64| LoadConfig {
            site: site.to_string(),
            kw,
            kvar,
        };
        Self {
            name: "DER_Feeder".to_string(),
            loads: vec![
                load("802", 500.0, 100.0),
                load("806", 800.0, 200.0),
                load("808", 300.0, 80.0),
            ],
            load_shape: LoadShape::Flat,
            max_apparent_kva: None,
        }
    }
}

impl FeederConfig {
    /// Unscaled total of fixed real load (kW).
    pub fn total_load_kw(&self) -> f64 {
        self.loads.iter().map(|l| l.kw).sum()
    }
}

/// Co-simulation exchange parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CosimConfig {
    pub federate_name: String,
    /// Feeder-to-transmission aggregation factor applied to published net power.
    pub scale_factor: f64,
    /// Retries for transient bus errors before the run fails.
    pub max_retries: u32,
    /// In-process transmission proxy: voltage with no feeder load (pu).
    pub voltage_base_pu: f64,
    /// In-process transmission proxy: voltage drop per published kW (pu/kW).
    pub voltage_sensitivity_pu_per_kw: f64,
    /// In-process price source: off-peak price ($/MWh).
    pub price_base_per_mwh: f64,
    /// In-process price source: adder during the evening peak ($/MWh).
    pub price_peak_adder_per_mwh: f64,
    pub price_peak_start_hour: f64,
    pub price_peak_end_hour: f64,
}

impl Default for CosimConfig {
    fn default() -> Self {
        Self {
            federate_name: "DER_DistributionFederate".to_string(),
            scale_factor: 20.0,
            max_retries: 3,
            voltage_base_pu: 1.0,
            voltage_sensitivity_pu_per_kw: 1.0e-6,
            price_base_per_mwh: 40.0,
            price_peak_adder_per_mwh: 60.0,
            price_peak_start_hour: 17.0,
            price_peak_end_hour: 21.0,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"battery[0].soc_min"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Prefixes the field path, e.g. `battery.soc_min` becomes `battery[2].soc_min`.
    fn indexed(mut self, section: &str, index: usize) -> Self {
        if let Some(rest) = self.field.strip_prefix(section) {
            self.field = format!("{section}[{index}]{rest}");
        }
        self
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Joins validation errors into one message, one per line.
pub fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl ScenarioConfig {
    /// Returns the baseline scenario.
    pub fn baseline() -> Self {
        Self::default()
    }

    /// Returns the high-solar preset: a third PV array, a larger battery and
    /// a residential load shape, so midday reverse flow appears.
    pub fn high_solar() -> Self {
        let mut solar = default_solar();
        solar.push(SolarConfig {
            site: "PV3".to_string(),
            rated_kw: 1200.0,
            efficiency: 0.21,
            temp_coeff_per_c: default_temp_coeff(),
        });
        Self {
            solar,
            battery: vec![BatteryConfig {
                power_rating_kw: 250.0,
                energy_capacity_kwh: 1000.0,
                initial_soc: 0.3,
                ..default_battery().remove(0)
            }],
            dispatch: DispatchConfig {
                max_charge_kw: 250.0,
                discharge_kw: 200.0,
                ..DispatchConfig::default()
            },
            feeder: FeederConfig {
                load_shape: LoadShape::Residential,
                ..FeederConfig::default()
            },
            ..Self::default()
        }
    }

    /// Returns the arbitrage preset: the stand-alone 50 kW / 200 kWh battery
    /// on a clock-driven schedule with clear skies.
    pub fn arbitrage() -> Self {
        Self {
            environment: EnvironmentConfig {
                clouds: false,
                ..EnvironmentConfig::default()
            },
            battery: vec![BatteryConfig {
                power_rating_kw: 50.0,
                energy_capacity_kwh: 200.0,
                ..default_battery().remove(0)
            }],
            dispatch: DispatchConfig {
                policy: PolicyKind::Arbitrage,
                ..DispatchConfig::default()
            },
            ..Self::default()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "high_solar", "arbitrage"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "high_solar" => Ok(Self::high_solar()),
            "arbitrage" => Ok(Self::arbitrage()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = &self.simulation;

        if !(s.step_hours.is_finite() && s.step_hours > 0.0) {
            errors.push(ConfigError::new("simulation.step_hours", "must be > 0"));
        }
        if !(s.stop_hours.is_finite() && s.stop_hours >= 0.0) {
            errors.push(ConfigError::new("simulation.stop_hours", "must be >= 0"));
        }

        let env = &self.environment;
        if env.peak_irradiance_w_m2 < 0.0 {
            errors.push(ConfigError::new("environment.peak_irradiance_w_m2", "must be >= 0"));
        }
        if env.sunrise_hour >= env.sunset_hour {
            errors.push(ConfigError::new(
                "environment.sunrise_hour",
                "must be < environment.sunset_hour",
            ));
        }
        if env.clouds {
            if env.cloud_start_hour > env.cloud_end_hour {
                errors.push(ConfigError::new(
                    "environment.cloud_start_hour",
                    "must be <= environment.cloud_end_hour",
                ));
            }
            if !(0.0..=1.0).contains(&env.cloud_min_factor) {
                errors.push(ConfigError::new(
                    "environment.cloud_min_factor",
                    "must be in [0.0, 1.0]",
                ));
            }
        }

        if self.solar.is_empty() {
            errors.push(ConfigError::new("solar", "at least one unit is required"));
        }
        for (i, unit) in self.solar.iter().enumerate() {
            if let Err(e) = SolarUnit::new(
                unit.site.clone(),
                unit.rated_kw,
                unit.efficiency,
                unit.temp_coeff_per_c,
            ) {
                errors.push(e.indexed("solar", i));
            }
        }

        if self.battery.is_empty() {
            errors.push(ConfigError::new("battery", "at least one unit is required"));
        }
        for (i, unit) in self.battery.iter().enumerate() {
            if let Err(e) = BatteryUnit::new(unit.site.clone(), unit.spec(), unit.initial_soc) {
                errors.push(e.indexed("battery", i));
            }
        }

        let mut sites = BTreeSet::new();
        let der_sites = self.solar.iter().map(|u| &u.site).chain(self.battery.iter().map(|u| &u.site));
        for site in der_sites {
            if site.is_empty() {
                errors.push(ConfigError::new("site", "must not be empty"));
            } else if !sites.insert(site.as_str()) {
                errors.push(ConfigError::new("site", format!("duplicate site \"{site}\"")));
            }
        }

        let d = &self.dispatch;
        if d.peak_start_hour > d.peak_end_hour {
            errors.push(ConfigError::new(
                "dispatch.peak_start_hour",
                "must be <= dispatch.peak_end_hour",
            ));
        }
        if d.max_charge_kw < 0.0 || d.discharge_kw < 0.0 {
            errors.push(ConfigError::new(
                "dispatch.max_charge_kw",
                "charge and discharge rates must be >= 0",
            ));
        }
        if d.arbitrage_charge_kw < 0.0 || d.arbitrage_discharge_kw < 0.0 {
            errors.push(ConfigError::new(
                "dispatch.arbitrage_charge_kw",
                "charge and discharge rates must be >= 0",
            ));
        }
        let mut windows = d
            .arbitrage_charge_windows
            .iter()
            .chain(std::iter::once(&d.arbitrage_discharge_window));
        if windows.any(|w| w[0] > w[1]) {
            errors.push(ConfigError::new(
                "dispatch.arbitrage_charge_windows",
                "window start must be <= end",
            ));
        }

        let f = &self.feeder;
        if f.loads.iter().any(|l| !(l.kw.is_finite() && l.kvar.is_finite())) {
            errors.push(ConfigError::new("feeder.loads", "load values must be finite"));
        }
        if f.max_apparent_kva.is_some_and(|limit| limit <= 0.0) {
            errors.push(ConfigError::new("feeder.max_apparent_kva", "must be > 0"));
        }

        let c = &self.cosim;
        if !(c.scale_factor.is_finite() && c.scale_factor > 0.0) {
            errors.push(ConfigError::new("cosim.scale_factor", "must be > 0"));
        }
        if c.federate_name.is_empty() {
            errors.push(ConfigError::new("cosim.federate_name", "must not be empty"));
        }

        errors
    }

    /// Builds the configured solar units.
    ///
    /// # Errors
    ///
    /// Returns the first invalid unit.
    pub fn solar_units(&self) -> Result<Vec<SolarUnit>, ConfigError> {
        self.solar
            .iter()
            .enumerate()
            .map(|(i, u)| {
                SolarUnit::new(u.site.clone(), u.rated_kw, u.efficiency, u.temp_coeff_per_c)
                    .map_err(|e| e.indexed("solar", i))
            })
            .collect()
    }

    /// Builds the configured battery units at their initial SOC.
    ///
    /// # Errors
    ///
    /// Returns the first invalid unit.
    pub fn battery_units(&self) -> Result<Vec<BatteryUnit>, ConfigError> {
        self.battery
            .iter()
            .enumerate()
            .map(|(i, u)| {
                BatteryUnit::new(u.site.clone(), u.spec(), u.initial_soc)
                    .map_err(|e| e.indexed("battery", i))
            })
            .collect()
    }

    /// Builds the environment source, seeded from `simulation.seed`.
    pub fn environment_source(&self) -> ClearSkyDay {
        let env = &self.environment;
        let day = ClearSkyDay::new(
            env.peak_irradiance_w_m2,
            env.sunrise_hour,
            env.sunset_hour,
            self.simulation.seed,
        )
        .with_temperature(env.temp_base_c, env.temp_amplitude_c);
        if env.clouds {
            day.with_clouds(env.cloud_start_hour, env.cloud_end_hour, env.cloud_min_factor)
        } else {
            day
        }
    }

    /// Builds the lumped feeder with every DER site registered.
    pub fn lumped_feeder(&self) -> LumpedFeeder {
        let loads = self
            .feeder
            .loads
            .iter()
            .map(|l| FeederLoad {
                site: l.site.clone(),
                kw: l.kw,
                kvar: l.kvar,
            })
            .collect();
        let mut feeder = LumpedFeeder::new(self.feeder.name.clone(), loads);
        if let Some(limit) = self.feeder.max_apparent_kva {
            feeder = feeder.with_apparent_limit(limit);
        }
        for unit in &self.solar {
            feeder.register_generator(unit.site.clone());
        }
        for unit in &self.battery {
            feeder.register_storage(unit.site.clone());
        }
        feeder
    }
}
