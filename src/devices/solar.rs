use crate::config::ConfigError;

/// Reference cell temperature for rated output (°C).
const REFERENCE_TEMP_C: f64 = 25.0;
/// Cell temperature rise above ambient under irradiance (simple NOCT model, °C).
const CELL_TEMP_RISE_C: f64 = 25.0;
/// Inverter efficiency at rated output.
const INVERTER_NOMINAL_EFF: f64 = 0.96;
/// Inverter efficiency drop between rated output and zero output.
const INVERTER_LOW_LOAD_DROP: f64 = 0.01;
/// Standard test condition irradiance (W/m²).
const STC_IRRADIANCE_W_M2: f64 = 1000.0;

/// Immutable description of a solar PV installation.
///
/// `SolarUnit` has no state: its output is a pure function of the
/// environment, see [`SolarUnit::power_kw`].
#[derive(Debug, Clone, PartialEq)]
pub struct SolarUnit {
    /// Site identifier used when handing setpoints to the solver.
    pub site: String,

    /// Nameplate capacity at standard test conditions (kW).
    pub rated_kw: f64,

    /// Panel conversion efficiency (0..1.0).
    pub efficiency: f64,

    /// Power temperature coefficient as a fraction per °C (negative).
    pub temp_coeff_per_c: f64,
}

impl SolarUnit {
    /// Creates a solar unit.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the rating is negative or the efficiency is
    /// outside `(0.0, 1.0]`.
    pub fn new(
        site: impl Into<String>,
        rated_kw: f64,
        efficiency: f64,
        temp_coeff_per_c: f64,
    ) -> Result<Self, ConfigError> {
        if !(rated_kw.is_finite() && rated_kw >= 0.0) {
            return Err(ConfigError::new("solar.rated_kw", "must be >= 0"));
        }
        if !(efficiency > 0.0 && efficiency <= 1.0) {
            return Err(ConfigError::new("solar.efficiency", "must be in (0.0, 1.0]"));
        }
        if !temp_coeff_per_c.is_finite() {
            return Err(ConfigError::new("solar.temp_coeff_per_c", "must be finite"));
        }
        Ok(Self {
            site: site.into(),
            rated_kw,
            efficiency,
            temp_coeff_per_c,
        })
    }

    /// Approximate panel area (m²) that yields the rated output at STC.
    pub fn effective_area_m2(&self) -> f64 {
        self.rated_kw / self.efficiency
    }

    /// AC output for the given environment (kW, in `[0, rated_kw]`).
    pub fn power_kw(&self, irradiance_w_m2: f64, ambient_temp_c: f64) -> f64 {
        ac_power_kw(
            self.rated_kw,
            self.efficiency,
            self.temp_coeff_per_c,
            irradiance_w_m2,
            ambient_temp_c,
        )
    }
}

/// Computes PV AC output from ratings and ambient conditions.
///
/// DC power is proportional to panel area, irradiance and efficiency, derated
/// linearly about a 25 °C cell reference. The inverter efficiency falls
/// linearly from 96 % at rated output to 95 % near zero output. The result is
/// clamped to `[0, rated_kw]`; zero irradiance always yields zero.
///
/// # Arguments
///
/// * `rated_kw` - Nameplate capacity (kW)
/// * `efficiency` - Panel conversion efficiency (0..1.0)
/// * `temp_coeff_per_c` - Power temperature coefficient (fraction per °C)
/// * `irradiance_w_m2` - Plane-of-array irradiance (W/m², >= 0)
/// * `ambient_temp_c` - Ambient air temperature (°C)
pub fn ac_power_kw(
    rated_kw: f64,
    efficiency: f64,
    temp_coeff_per_c: f64,
    irradiance_w_m2: f64,
    ambient_temp_c: f64,
) -> f64 {
    if !(rated_kw > 0.0 && efficiency > 0.0 && irradiance_w_m2 > 0.0) {
        return 0.0;
    }

    let area_m2 = rated_kw / efficiency;
    let mut dc_kw = area_m2 * irradiance_w_m2 * efficiency / STC_IRRADIANCE_W_M2;

    let cell_temp_c = ambient_temp_c + CELL_TEMP_RISE_C;
    dc_kw *= 1.0 + temp_coeff_per_c * (cell_temp_c - REFERENCE_TEMP_C);
    if !(dc_kw > 0.0) {
        return 0.0;
    }

    let loading = (dc_kw / rated_kw).min(1.0);
    let inverter_eff = INVERTER_NOMINAL_EFF - INVERTER_LOW_LOAD_DROP * (1.0 - loading);

    (dc_kw * inverter_eff).clamp(0.0, rated_kw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pv() -> SolarUnit {
        SolarUnit::new("802", 100.0, 0.20, -0.004).expect("valid unit")
    }

    #[test]
    fn zero_irradiance_yields_zero() {
        assert_eq!(pv().power_kw(0.0, 20.0), 0.0);
        assert_eq!(ac_power_kw(100.0, 0.2, -0.004, 0.0, 20.0), 0.0);
    }

    #[test]
    fn effective_area_scales_with_efficiency() {
        assert_relative_eq!(pv().effective_area_m2(), 500.0);
    }

    #[test]
    fn full_sun_at_reference_conditions() {
        // Ambient 0 °C puts the cell at the 25 °C reference: no derating.
        let kw = pv().power_kw(1000.0, 0.0);
        assert_relative_eq!(kw, 96.0, epsilon = 1e-9);
    }

    #[test]
    fn heat_derates_output() {
        let unit = pv();
        let cool = unit.power_kw(800.0, 5.0);
        let hot = unit.power_kw(800.0, 35.0);
        assert!(hot < cool);
    }

    #[test]
    fn cold_boost_is_clamped_to_rating() {
        let kw = pv().power_kw(1400.0, -40.0);
        assert_eq!(kw, 100.0);
    }

    #[test]
    fn inverter_is_less_efficient_at_low_load() {
        let unit = pv();
        let low = unit.power_kw(100.0, 0.0);
        // DC is 10 kW at 10 % loading → 0.96 - 0.01 * 0.9 = 0.951
        assert_relative_eq!(low, 10.0 * 0.951, epsilon = 1e-9);
    }

    #[test]
    fn extreme_heat_never_goes_negative() {
        let unit = SolarUnit::new("x", 10.0, 0.2, -0.05).expect("valid unit");
        assert_eq!(unit.power_kw(1000.0, 60.0), 0.0);
    }

    #[test]
    fn rejects_bad_efficiency() {
        let err = SolarUnit::new("x", 10.0, 0.0, -0.004).expect_err("must fail");
        assert_eq!(err.field, "solar.efficiency");
    }
}
