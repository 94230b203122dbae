//! Irradiance and ambient temperature sources for the solar model.

use std::f64::consts::PI;

use rand::{Rng, SeedableRng, rngs::StdRng};

use super::solar::SolarUnit;

/// Weather conditions seen by every solar unit at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conditions {
    /// Plane-of-array irradiance (W/m², >= 0).
    pub irradiance_w_m2: f64,
    /// Ambient air temperature (°C).
    pub ambient_temp_c: f64,
}

/// Produces environment samples for a simulated hour of day.
pub trait EnvironmentSource {
    /// Returns conditions at `hour_of_day` (0.0..24.0).
    fn sample(&mut self, hour_of_day: f64) -> Conditions;
}

/// Constant conditions regardless of time.
#[derive(Debug, Clone, Copy)]
pub struct FixedConditions(pub Conditions);

impl EnvironmentSource for FixedConditions {
    fn sample(&mut self, _hour_of_day: f64) -> Conditions {
        self.0
    }
}

/// Clear-sky day with a sinusoidal irradiance arc and an optional cloudy window.
///
/// Irradiance follows `peak * sin(pi * (h - sunrise) / (sunset - sunrise))`
/// between sunrise and sunset and is zero otherwise. Inside the cloud window
/// it is scaled by a factor drawn uniformly from `[cloud_min_factor, 1.0)`.
/// Temperature follows `base + amplitude * sin(pi * (h - 6) / 12)`.
#[derive(Debug, Clone)]
pub struct ClearSkyDay {
    pub peak_irradiance_w_m2: f64,
    pub sunrise_hour: f64,
    pub sunset_hour: f64,
    pub temp_base_c: f64,
    pub temp_amplitude_c: f64,
    /// Cloudy hours, inclusive on both ends. `None` disables clouds.
    pub cloud_window: Option<(f64, f64)>,
    pub cloud_min_factor: f64,
    rng: StdRng,
}

impl ClearSkyDay {
    /// Creates a clear-sky source with no clouds and the given seed.
    pub fn new(peak_irradiance_w_m2: f64, sunrise_hour: f64, sunset_hour: f64, seed: u64) -> Self {
        Self {
            peak_irradiance_w_m2: peak_irradiance_w_m2.max(0.0),
            sunrise_hour,
            sunset_hour,
            temp_base_c: 20.0,
            temp_amplitude_c: 10.0,
            cloud_window: None,
            cloud_min_factor: 1.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Sets the diurnal temperature curve.
    pub fn with_temperature(mut self, base_c: f64, amplitude_c: f64) -> Self {
        self.temp_base_c = base_c;
        self.temp_amplitude_c = amplitude_c;
        self
    }

    /// Enables passing clouds between `start_hour` and `end_hour`.
    pub fn with_clouds(mut self, start_hour: f64, end_hour: f64, min_factor: f64) -> Self {
        self.cloud_window = Some((start_hour, end_hour));
        self.cloud_min_factor = min_factor.clamp(0.0, 1.0);
        self
    }

    /// Clear-sky irradiance before cloud attenuation.
    pub fn clear_sky_irradiance(&self, hour_of_day: f64) -> f64 {
        let span = self.sunset_hour - self.sunrise_hour;
        if span <= 0.0 || hour_of_day < self.sunrise_hour || hour_of_day > self.sunset_hour {
            return 0.0;
        }
        let arc = (PI * (hour_of_day - self.sunrise_hour) / span).sin();
        (self.peak_irradiance_w_m2 * arc).max(0.0)
    }

    /// Ambient temperature at the given hour.
    pub fn temperature_c(&self, hour_of_day: f64) -> f64 {
        self.temp_base_c + self.temp_amplitude_c * (PI * (hour_of_day - 6.0) / 12.0).sin()
    }
}

impl EnvironmentSource for ClearSkyDay {
    fn sample(&mut self, hour_of_day: f64) -> Conditions {
        let mut irradiance = self.clear_sky_irradiance(hour_of_day);
        if let Some((start, end)) = self.cloud_window
            && irradiance > 0.0
            && (start..=end).contains(&hour_of_day)
        {
            let u: f64 = self.rng.random();
            irradiance *= self.cloud_min_factor + (1.0 - self.cloud_min_factor) * u;
        }
        Conditions {
            irradiance_w_m2: irradiance,
            ambient_temp_c: self.temperature_c(hour_of_day),
        }
    }
}

/// A sampled daily generation profile of one solar unit.
#[derive(Debug, Clone)]
pub struct DailyProfile {
    /// Sample times (hours of day).
    pub hours: Vec<f64>,
    /// AC output at each sample (kW).
    pub power_kw: Vec<f64>,
}

impl DailyProfile {
    /// Energy under the profile by trapezoidal integration (kWh).
    pub fn energy_kwh(&self) -> f64 {
        self.hours
            .windows(2)
            .zip(self.power_kw.windows(2))
            .map(|(h, p)| (h[1] - h[0]) * (p[0] + p[1]) / 2.0)
            .sum()
    }

    /// Mean output divided by rated capacity.
    pub fn capacity_factor(&self, rated_kw: f64) -> f64 {
        if self.power_kw.is_empty() || rated_kw <= 0.0 {
            return 0.0;
        }
        let mean = self.power_kw.iter().sum::<f64>() / self.power_kw.len() as f64;
        mean / rated_kw
    }
}

/// Samples one unit's output over a 24 h day at `step_hours` resolution.
pub fn daily_profile(
    unit: &SolarUnit,
    source: &mut impl EnvironmentSource,
    step_hours: f64,
) -> DailyProfile {
    if !(step_hours > 0.0) {
        return DailyProfile {
            hours: Vec::new(),
            power_kw: Vec::new(),
        };
    }
    let steps = (24.0 / step_hours).round() as usize;
    let mut hours = Vec::with_capacity(steps);
    let mut power_kw = Vec::with_capacity(steps);
    for i in 0..steps {
        let h = i as f64 * step_hours;
        let c = source.sample(h);
        hours.push(h);
        power_kw.push(unit.power_kw(c.irradiance_w_m2, c.ambient_temp_c));
    }
    DailyProfile { hours, power_kw }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn night_has_no_irradiance() {
        let mut sky = ClearSkyDay::new(1000.0, 6.0, 18.0, 1);
        assert_eq!(sky.sample(0.0).irradiance_w_m2, 0.0);
        assert_eq!(sky.sample(5.75).irradiance_w_m2, 0.0);
        assert_eq!(sky.sample(22.0).irradiance_w_m2, 0.0);
    }

    #[test]
    fn noon_reaches_peak() {
        let mut sky = ClearSkyDay::new(1000.0, 6.0, 18.0, 1);
        let c = sky.sample(12.0);
        assert_relative_eq!(c.irradiance_w_m2, 1000.0, epsilon = 1e-9);
        assert_relative_eq!(c.ambient_temp_c, 30.0, epsilon = 1e-9);
    }

    #[test]
    fn clouds_only_attenuate_inside_window() {
        let mut sky = ClearSkyDay::new(1000.0, 6.0, 18.0, 3).with_clouds(10.0, 14.0, 0.7);
        for i in 0..=16 {
            let h = 10.0 + 0.25 * i as f64;
            let clear = sky.clear_sky_irradiance(h);
            let cloudy = sky.sample(h).irradiance_w_m2;
            assert!(cloudy <= clear + 1e-9);
            assert!(cloudy >= 0.7 * clear - 1e-9);
        }
        let clear = sky.clear_sky_irradiance(9.0);
        assert_eq!(sky.sample(9.0).irradiance_w_m2, clear);
    }

    #[test]
    fn same_seed_same_clouds() {
        let mut a = ClearSkyDay::new(1000.0, 6.0, 18.0, 42).with_clouds(10.0, 14.0, 0.7);
        let mut b = ClearSkyDay::new(1000.0, 6.0, 18.0, 42).with_clouds(10.0, 14.0, 0.7);
        for i in 0..96 {
            let h = i as f64 * 0.25;
            assert_eq!(a.sample(h), b.sample(h));
        }
    }

    #[test]
    fn daily_profile_of_100kw_unit() {
        let unit = SolarUnit::new("pv", 100.0, 0.2, -0.004).expect("valid unit");
        let mut sky = ClearSkyDay::new(1000.0, 6.0, 18.0, 0);
        let profile = daily_profile(&unit, &mut sky, 0.25);
        assert_eq!(profile.hours.len(), 96);
        assert!(profile.power_kw.iter().all(|&p| (0.0..=100.0).contains(&p)));
        let energy = profile.energy_kwh();
        assert!(energy > 400.0 && energy < 800.0, "energy={energy}");
        let cf = profile.capacity_factor(100.0);
        assert!(cf > 0.15 && cf < 0.35, "cf={cf}");
    }

    #[test]
    fn fixed_source_is_constant() {
        let c = Conditions {
            irradiance_w_m2: 500.0,
            ambient_temp_c: 10.0,
        };
        let mut src = FixedConditions(c);
        assert_eq!(src.sample(3.0), c);
        assert_eq!(src.sample(15.0), c);
    }
}
