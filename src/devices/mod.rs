//! Distributed energy resource models.

/// Stationary battery storage model.
pub mod battery;
/// Irradiance and temperature sources.
pub mod environment;
/// Solar photovoltaic generation model.
pub mod solar;

// Re-export the main types for convenience
pub use battery::{BatterySpec, BatteryUnit, DispatchOutcome, Headroom};
pub use environment::{ClearSkyDay, Conditions, EnvironmentSource, FixedConditions};
pub use solar::SolarUnit;
