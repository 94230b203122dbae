//! Message-bus capability used by the orchestrator to join a federation.

use std::fmt;

use thiserror::Error;

use crate::sim::types::ComplexPower;

/// Net complex power at the point of interconnection, scaled for transmission.
pub const TOTAL_POWER: &str = "DER_Dist/total_power";
/// Total solar generation (kW).
pub const SOLAR_GENERATION: &str = "DER_Dist/solar_generation";
/// Total battery power (kW; positive=charge).
pub const BATTERY_POWER: &str = "DER_Dist/battery_power";
/// Transmission-side voltage magnitude (pu).
pub const TRANS_VOLTAGE: &str = "Trans/voltage";
/// Market price ($/MWh).
pub const MARKET_PRICE: &str = "Market/price";

/// Payload type carried by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Double,
    Complex,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Double => f.write_str("double"),
            Self::Complex => f.write_str("complex"),
        }
    }
}

/// A typed value exchanged over the bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BusValue {
    Double(f64),
    Complex(ComplexPower),
}

impl BusValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Double(_) => ValueKind::Double,
            Self::Complex(_) => ValueKind::Complex,
        }
    }

    /// Real-valued view; a complex value yields its real part.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Double(v) => *v,
            Self::Complex(s) => s.p_kw,
        }
    }

    pub fn as_complex(&self) -> Option<ComplexPower> {
        match self {
            Self::Complex(s) => Some(*s),
            Self::Double(_) => None,
        }
    }
}

/// Failures reported by a message bus.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("timed out waiting for the federation: {0}")]
    Timeout(String),
    #[error("time request denied: requested {requested_hr}h, granted {granted_hr}h at {current_hr}h")]
    TimeDenied {
        current_hr: f64,
        requested_hr: f64,
        granted_hr: f64,
    },
    #[error("unknown channel \"{0}\"")]
    UnknownChannel(String),
    #[error("channel \"{channel}\" carries {expected} values, got {actual}")]
    KindMismatch {
        channel: String,
        expected: ValueKind,
        actual: ValueKind,
    },
    #[error("bus is not in executing mode")]
    NotExecuting,
}

impl BusError {
    /// Returns `true` for errors worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Publish/subscribe and time-advance service of a co-simulation federation.
///
/// Implementations may block in [`MessageBus::enter_executing_mode`] and
/// [`MessageBus::request_time`] until every participant is ready; these are
/// the only suspension points of a run.
pub trait MessageBus {
    /// Declares an outgoing channel.
    fn register_publication(
        &mut self,
        name: &str,
        kind: ValueKind,
        units: &str,
    ) -> Result<(), BusError>;

    /// Declares an incoming channel.
    fn register_subscription(&mut self, name: &str, units: &str) -> Result<(), BusError>;

    /// Blocks until the federation is ready to step.
    fn enter_executing_mode(&mut self) -> Result<(), BusError>;

    /// Requests an advance to `time_hr` and returns the granted time, which
    /// never exceeds the request.
    fn request_time(&mut self, time_hr: f64) -> Result<f64, BusError>;

    /// Publishes a value on a registered channel.
    fn publish(&mut self, name: &str, value: BusValue) -> Result<(), BusError>;

    /// Latest value received on a subscription, if any has arrived.
    fn latest(&self, name: &str) -> Option<BusValue>;

    /// Leaves the federation and releases bus resources.
    fn finalize(&mut self) -> Result<(), BusError>;
}
