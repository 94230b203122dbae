//! Power-flow solver seam and a lumped feeder implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

use serde::Deserialize;
use thiserror::Error;

use super::power_balance::net_import_kw;
use super::types::ComplexPower;

/// Per-step injections handed to the solver, keyed by site identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Setpoints {
    /// Generator output per site (kW, >= 0).
    pub generators: BTreeMap<String, f64>,
    /// Storage power per site (kW; positive=charge).
    pub storage: BTreeMap<String, f64>,
    /// Multiplier applied to every fixed load this step.
    pub load_multiplier: f64,
}

impl Setpoints {
    pub fn new(load_multiplier: f64) -> Self {
        Self {
            load_multiplier,
            ..Self::default()
        }
    }
}

/// Solved operating point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSolution {
    /// Net power drawn at the feeder head.
    pub feeder_head: ComplexPower,
}

/// The solver could not produce a valid operating point.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvergenceError {
    #[error("setpoint for site \"{0}\" is not finite")]
    NonFinite(String),
    #[error("unknown site \"{0}\"")]
    UnknownSite(String),
    #[error("apparent power {kva:.1} kVA exceeds the solvable limit of {limit_kva:.1} kVA")]
    ApparentPowerLimit { kva: f64, limit_kva: f64 },
    #[error("solver diverged: {0}")]
    Diverged(String),
}

/// Distribution power-flow solver as seen by the orchestrator.
///
/// Treated as synchronous; any internal state is the solver's own concern.
pub trait PowerFlowSolver {
    /// Applies the setpoints and returns the feeder-head power.
    ///
    /// # Errors
    ///
    /// Returns a `ConvergenceError` when no solution is found. Callers treat
    /// this as recoverable.
    fn solve(&mut self, setpoints: &Setpoints) -> Result<FlowSolution, ConvergenceError>;
}

/// Daily shape applied to fixed feeder loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadShape {
    /// Constant load.
    #[default]
    Flat,
    /// Residential curve with a midday trough and an evening peak.
    Residential,
}

impl LoadShape {
    /// Load multiplier at the given hour of day.
    pub fn multiplier(self, hour_of_day: f64) -> f64 {
        match self {
            Self::Flat => 1.0,
            Self::Residential => {
                let base = 0.7 + 0.3 * (PI * (hour_of_day - 10.0) / 14.0).sin();
                if hour_of_day > 17.0 { base + 0.2 } else { base }
            }
        }
    }
}

/// A fixed load attached to a feeder bus.
#[derive(Debug, Clone, PartialEq)]
pub struct FeederLoad {
    pub site: String,
    pub kw: f64,
    pub kvar: f64,
}

/// A feeder model that aggregates loads and DER injections at the head.
///
/// Net real power is load minus generation plus storage charging; reactive
/// power comes from the loads alone (DER run at unity power factor). Sites
/// must be registered before they can receive setpoints.
#[derive(Debug, Clone)]
pub struct LumpedFeeder {
    name: String,
    loads: Vec<FeederLoad>,
    generator_sites: BTreeSet<String>,
    storage_sites: BTreeSet<String>,
    max_apparent_kva: Option<f64>,
    solves: usize,
}

impl LumpedFeeder {
    /// Creates a feeder with the given fixed loads and no DER sites.
    pub fn new(name: impl Into<String>, loads: Vec<FeederLoad>) -> Self {
        Self {
            name: name.into(),
            loads,
            generator_sites: BTreeSet::new(),
            storage_sites: BTreeSet::new(),
            max_apparent_kva: None,
            solves: 0,
        }
    }

    /// Fails to converge above this apparent power (voltage-collapse proxy).
    pub fn with_apparent_limit(mut self, limit_kva: f64) -> Self {
        self.max_apparent_kva = Some(limit_kva);
        self
    }

    pub fn register_generator(&mut self, site: impl Into<String>) {
        self.generator_sites.insert(site.into());
    }

    pub fn register_storage(&mut self, site: impl Into<String>) {
        self.storage_sites.insert(site.into());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unscaled total of fixed real load (kW).
    pub fn total_load_kw(&self) -> f64 {
        self.loads.iter().map(|l| l.kw).sum()
    }

    /// Number of successful solves.
    pub fn solves(&self) -> usize {
        self.solves
    }

    fn check_sites(
        sites: &BTreeSet<String>,
        values: &BTreeMap<String, f64>,
    ) -> Result<f64, ConvergenceError> {
        let mut total = 0.0;
        for (site, &kw) in values {
            if !sites.contains(site) {
                return Err(ConvergenceError::UnknownSite(site.clone()));
            }
            if !kw.is_finite() {
                return Err(ConvergenceError::NonFinite(site.clone()));
            }
            total += kw;
        }
        Ok(total)
    }
}

impl PowerFlowSolver for LumpedFeeder {
    fn solve(&mut self, setpoints: &Setpoints) -> Result<FlowSolution, ConvergenceError> {
        if !setpoints.load_multiplier.is_finite() {
            return Err(ConvergenceError::NonFinite("load_multiplier".to_string()));
        }
        let generation_kw = Self::check_sites(&self.generator_sites, &setpoints.generators)?;
        let storage_kw = Self::check_sites(&self.storage_sites, &setpoints.storage)?;

        let m = setpoints.load_multiplier;
        let load_kw: f64 = self.loads.iter().map(|l| l.kw * m).sum();
        let load_kvar: f64 = self.loads.iter().map(|l| l.kvar * m).sum();

        let head = ComplexPower::new(net_import_kw(load_kw, generation_kw, storage_kw), load_kvar);
        if let Some(limit_kva) = self.max_apparent_kva {
            let kva = head.apparent_kva();
            if kva > limit_kva {
                return Err(ConvergenceError::ApparentPowerLimit { kva, limit_kva });
            }
        }

        self.solves += 1;
        Ok(FlowSolution { feeder_head: head })
    }
}
