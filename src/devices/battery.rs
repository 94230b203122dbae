use crate::config::ConfigError;

/// Static ratings of a battery storage unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatterySpec {
    /// Symmetric charge/discharge power limit in kilowatts.
    pub power_rating_kw: f64,

    /// Energy capacity in kilowatt-hours.
    pub energy_capacity_kwh: f64,

    /// Round-trip efficiency (0..=1.0), split evenly across both legs.
    pub round_trip_efficiency: f64,

    /// Lower state-of-charge bound as a fraction.
    pub soc_min: f64,

    /// Upper state-of-charge bound as a fraction.
    pub soc_max: f64,
}

impl BatterySpec {
    /// One-way efficiency applied to each of the charge and discharge legs.
    pub fn leg_efficiency(&self) -> f64 {
        self.round_trip_efficiency.sqrt()
    }

    /// Checks every rating and returns the first violation.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` naming the offending field.
    pub fn check(&self) -> Result<(), ConfigError> {
        if !(self.power_rating_kw.is_finite() && self.power_rating_kw >= 0.0) {
            return Err(ConfigError::new("battery.power_rating_kw", "must be >= 0"));
        }
        if !(self.energy_capacity_kwh.is_finite() && self.energy_capacity_kwh > 0.0) {
            return Err(ConfigError::new("battery.energy_capacity_kwh", "must be > 0"));
        }
        if !(self.round_trip_efficiency > 0.0 && self.round_trip_efficiency <= 1.0) {
            return Err(ConfigError::new(
                "battery.round_trip_efficiency",
                "must be in (0.0, 1.0]",
            ));
        }
        if !(0.0..=1.0).contains(&self.soc_min) || !(0.0..=1.0).contains(&self.soc_max) {
            return Err(ConfigError::new("battery.soc_min", "SOC bounds must be in [0.0, 1.0]"));
        }
        if self.soc_min >= self.soc_max {
            return Err(ConfigError::new("battery.soc_min", "must be < battery.soc_max"));
        }
        Ok(())
    }
}

/// Result of executing one charge/discharge command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchOutcome {
    /// Power actually exchanged with the feeder (kW; positive=charge).
    pub actual_kw: f64,
    /// State of charge after the command.
    pub soc: f64,
}

/// Power the unit can still absorb or deliver, both as non-negative magnitudes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Headroom {
    pub charge_kw: f64,
    pub discharge_kw: f64,
}

/// A battery energy storage unit with a bounded state of charge.
///
/// The SOC is kept in `[soc_min, soc_max]` after every operation: commands that
/// would leave the band are clamped and the returned power is recomputed so
/// that it implies exactly the energy that was applied.
///
/// # Power Flow Convention (Feeder)
/// - Positive power: Charging (load on the feeder)
/// - Negative power: Discharging (generation on the feeder)
///
/// # Examples
///
/// ```
/// use der_cosim::devices::battery::{BatterySpec, BatteryUnit};
///
/// let spec = BatterySpec {
///     power_rating_kw: 50.0,
///     energy_capacity_kwh: 200.0,
///     round_trip_efficiency: 0.95,
///     soc_min: 0.1,
///     soc_max: 0.9,
/// };
/// let mut unit = BatteryUnit::new("808", spec, 0.5).unwrap();
/// let outcome = unit.charge_discharge(40.0, 0.25);
/// assert_eq!(outcome.actual_kw, 40.0);
/// assert!(outcome.soc > 0.5);
/// ```
#[derive(Debug, Clone)]
pub struct BatteryUnit {
    /// Site identifier used when handing setpoints to the solver.
    pub site: String,
    spec: BatterySpec,
    soc: f64,
}

impl BatteryUnit {
    /// Creates a battery unit at the given initial state of charge.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a rating is invalid or `initial_soc` lies
    /// outside `[soc_min, soc_max]`.
    pub fn new(site: impl Into<String>, spec: BatterySpec, initial_soc: f64) -> Result<Self, ConfigError> {
        spec.check()?;
        if !(spec.soc_min..=spec.soc_max).contains(&initial_soc) {
            return Err(ConfigError::new(
                "battery.initial_soc",
                format!("must be in [{}, {}]", spec.soc_min, spec.soc_max),
            ));
        }
        Ok(Self {
            site: site.into(),
            spec,
            soc: initial_soc,
        })
    }

    /// Returns the unit's ratings.
    pub fn spec(&self) -> &BatterySpec {
        &self.spec
    }

    /// Returns the current state of charge as a fraction.
    pub fn soc(&self) -> f64 {
        self.soc
    }

    /// Energy currently stored, in kWh.
    pub fn stored_energy_kwh(&self) -> f64 {
        self.soc * self.spec.energy_capacity_kwh
    }

    /// Energy that can still be withdrawn before reaching `soc_min`, in kWh.
    pub fn usable_energy_kwh(&self) -> f64 {
        (self.soc - self.spec.soc_min).max(0.0) * self.spec.energy_capacity_kwh
    }

    /// Executes a charge (positive) or discharge (negative) command.
    ///
    /// The request is first clamped to the power rating. Charging stores
    /// `kW * h * sqrt(eta)`, discharging withdraws `kW * h / sqrt(eta)`. If the
    /// resulting SOC would leave the band it is clamped to the bound and the
    /// returned power is derived back from the energy actually applied; its
    /// sign never flips and it becomes zero when no headroom remains.
    ///
    /// Non-finite requests and non-positive durations are treated as a zero
    /// command.
    ///
    /// # Arguments
    ///
    /// * `requested_kw` - Signed power request (kW)
    /// * `duration_h` - Duration the command is held (hours, > 0)
    pub fn charge_discharge(&mut self, requested_kw: f64, duration_h: f64) -> DispatchOutcome {
        if !requested_kw.is_finite() || !duration_h.is_finite() || duration_h <= 0.0 {
            return DispatchOutcome {
                actual_kw: 0.0,
                soc: self.soc,
            };
        }

        let rating = self.spec.power_rating_kw;
        let capacity = self.spec.energy_capacity_kwh;
        let leg = self.spec.leg_efficiency();

        let limited_kw = requested_kw.clamp(-rating, rating);
        let energy_kwh = if limited_kw > 0.0 {
            limited_kw * duration_h * leg
        } else {
            limited_kw * duration_h / leg
        };

        let candidate = self.soc + energy_kwh / capacity;
        let (new_soc, actual_kw) = if candidate > self.spec.soc_max || candidate < self.spec.soc_min {
            let bounded = candidate.clamp(self.spec.soc_min, self.spec.soc_max);
            let applied_kwh = (bounded - self.soc) * capacity;
            let kw = if limited_kw > 0.0 {
                (applied_kwh / (duration_h * leg)).max(0.0)
            } else {
                (applied_kwh * leg / duration_h).min(0.0)
            };
            (bounded, kw)
        } else {
            (candidate, limited_kw)
        };

        self.soc = new_soc;
        DispatchOutcome {
            actual_kw,
            soc: new_soc,
        }
    }

    /// Available charge/discharge power over a one-hour horizon.
    pub fn available_headroom(&self) -> Headroom {
        self.available_headroom_over(1.0)
    }

    /// Available charge/discharge power if held for `duration_h` hours.
    ///
    /// Each value is the lesser of the power rating and the power that would
    /// exhaust the remaining SOC headroom on the relevant efficiency leg.
    pub fn available_headroom_over(&self, duration_h: f64) -> Headroom {
        if !(duration_h > 0.0) {
            return Headroom {
                charge_kw: 0.0,
                discharge_kw: 0.0,
            };
        }
        let capacity = self.spec.energy_capacity_kwh;
        let leg = self.spec.leg_efficiency();
        let rating = self.spec.power_rating_kw;

        let charge_room_kwh = (self.spec.soc_max - self.soc).max(0.0) * capacity;
        let discharge_room_kwh = (self.soc - self.spec.soc_min).max(0.0) * capacity;

        Headroom {
            charge_kw: rating.min(charge_room_kwh / (leg * duration_h)),
            discharge_kw: rating.min(discharge_room_kwh * leg / duration_h),
        }
    }
}
