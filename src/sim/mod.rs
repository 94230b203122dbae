/// Granted-time cursor.
pub mod clock;
pub mod controller;
pub mod engine;
/// Power-flow solver contract and the lumped feeder.
pub mod feeder;
pub mod kpi;
pub mod power_balance;
pub mod types;
