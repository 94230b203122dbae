//! Co-simulation exchange: the message-bus seam and an in-process federation.

pub mod bus;
/// Single-process federation with attached peers.
pub mod inprocess;
pub mod peers;

pub use bus::{BusError, BusValue, MessageBus, ValueKind};
pub use inprocess::{InProcessBus, Publication};
pub use peers::{Peer, PriceCurve, TransmissionProxy};
