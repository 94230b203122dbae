//! In-memory federation for single-process runs and tests.

use std::collections::{BTreeMap, VecDeque};

use tracing::debug;

use super::bus::{BusError, BusValue, MessageBus, ValueKind};
use super::peers::Peer;

/// One recorded publication.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    /// Granted time at which the value was published.
    pub time_hr: f64,
    pub channel: String,
    pub value: BusValue,
}

#[derive(Debug, Clone)]
struct Channel {
    kind: ValueKind,
    units: String,
}

/// A federation that lives in one process.
///
/// Requested times are granted as-is unless a shortened grant has been
/// queued with [`InProcessBus::queue_short_grant`]. After each grant the attached
/// [`Peer`]s run in insertion order and their outputs become visible through
/// [`MessageBus::latest`]. All publications are kept for inspection.
pub struct InProcessBus {
    federate_name: String,
    publications: BTreeMap<String, Channel>,
    subscriptions: BTreeMap<String, String>,
    values: BTreeMap<String, BusValue>,
    history: Vec<Publication>,
    peers: Vec<Box<dyn Peer>>,
    faults: VecDeque<BusError>,
    shortfalls: VecDeque<f64>,
    granted_hr: f64,
    executing: bool,
    finalized: bool,
}

impl InProcessBus {
    pub fn new(federate_name: impl Into<String>) -> Self {
        Self {
            federate_name: federate_name.into(),
            publications: BTreeMap::new(),
            subscriptions: BTreeMap::new(),
            values: BTreeMap::new(),
            history: Vec::new(),
            peers: Vec::new(),
            faults: VecDeque::new(),
            shortfalls: VecDeque::new(),
            granted_hr: 0.0,
            executing: false,
            finalized: false,
        }
    }

    /// Attaches a peer federate.
    pub fn with_peer(mut self, peer: impl Peer + 'static) -> Self {
        self.peers.push(Box::new(peer));
        self
    }

    /// Makes upcoming time requests fail, one queued error per request.
    pub fn queue_request_error(&mut self, error: BusError) {
        self.faults.push_back(error);
    }

    /// Makes the next successful time request grant `shortfall_hr` less than
    /// requested, never earlier than the current grant.
    pub fn queue_short_grant(&mut self, shortfall_hr: f64) {
        self.shortfalls.push_back(shortfall_hr);
    }

    pub fn federate_name(&self) -> &str {
        &self.federate_name
    }

    pub fn granted_hr(&self) -> f64 {
        self.granted_hr
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Units declared for a registered channel.
    pub fn units(&self, name: &str) -> Option<&str> {
        self.publications
            .get(name)
            .map(|c| c.units.as_str())
            .or_else(|| self.subscriptions.get(name).map(String::as_str))
    }

    /// Every publication so far, in order.
    pub fn history(&self) -> &[Publication] {
        &self.history
    }

    /// Values published on one channel, in order.
    pub fn published(&self, channel: &str) -> Vec<BusValue> {
        self.history
            .iter()
            .filter(|p| p.channel == channel)
            .map(|p| p.value)
            .collect()
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.finalized {
            Err(BusError::Transport("federation already finalized".to_string()))
        } else {
            Ok(())
        }
    }
}

impl MessageBus for InProcessBus {
    fn register_publication(
        &mut self,
        name: &str,
        kind: ValueKind,
        units: &str,
    ) -> Result<(), BusError> {
        self.ensure_open()?;
        self.publications.insert(
            name.to_string(),
            Channel {
                kind,
                units: units.to_string(),
            },
        );
        Ok(())
    }

    fn register_subscription(&mut self, name: &str, units: &str) -> Result<(), BusError> {
        self.ensure_open()?;
        self.subscriptions.insert(name.to_string(), units.to_string());
        Ok(())
    }

    fn enter_executing_mode(&mut self) -> Result<(), BusError> {
        self.ensure_open()?;
        self.executing = true;
        debug!(federate = %self.federate_name, peers = self.peers.len(), "entered executing mode");
        Ok(())
    }

    fn request_time(&mut self, time_hr: f64) -> Result<f64, BusError> {
        self.ensure_open()?;
        if !self.executing {
            return Err(BusError::NotExecuting);
        }
        if let Some(fault) = self.faults.pop_front() {
            return Err(fault);
        }
        if !time_hr.is_finite() || time_hr < self.granted_hr {
            return Err(BusError::TimeDenied {
                current_hr: self.granted_hr,
                requested_hr: time_hr,
                granted_hr: self.granted_hr,
            });
        }
        let granted_hr = match self.shortfalls.pop_front() {
            Some(shortfall) => (time_hr - shortfall).max(self.granted_hr),
            None => time_hr,
        };
        self.granted_hr = granted_hr;

        let mut updates = Vec::new();
        for peer in &mut self.peers {
            updates.extend(peer.on_grant(granted_hr, &self.values));
        }
        self.values.extend(updates);
        Ok(granted_hr)
    }

    fn publish(&mut self, name: &str, value: BusValue) -> Result<(), BusError> {
        self.ensure_open()?;
        if !self.executing {
            return Err(BusError::NotExecuting);
        }
        let channel = self
            .publications
            .get(name)
            .ok_or_else(|| BusError::UnknownChannel(name.to_string()))?;
        if channel.kind != value.kind() {
            return Err(BusError::KindMismatch {
                channel: name.to_string(),
                expected: channel.kind,
                actual: value.kind(),
            });
        }
        self.values.insert(name.to_string(), value);
        self.history.push(Publication {
            time_hr: self.granted_hr,
            channel: name.to_string(),
            value,
        });
        Ok(())
    }

    fn latest(&self, name: &str) -> Option<BusValue> {
        if self.subscriptions.contains_key(name) {
            self.values.get(name).copied()
        } else {
            None
        }
    }

    fn finalize(&mut self) -> Result<(), BusError> {
        self.executing = false;
        self.finalized = true;
        debug!(federate = %self.federate_name, publications = self.history.len(), "federation finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosim::bus::{MARKET_PRICE, TOTAL_POWER, TRANS_VOLTAGE};
    use crate::cosim::peers::{PriceCurve, TransmissionProxy};
    use crate::sim::types::ComplexPower;

    fn bus() -> InProcessBus {
        let mut bus = InProcessBus::new("DER_Test")
            .with_peer(TransmissionProxy::new(1.0, 1.0e-5))
            .with_peer(PriceCurve {
                base_per_mwh: 40.0,
                peak_adder_per_mwh: 60.0,
                peak_window: (17.0, 21.0),
            });
        bus.register_publication(TOTAL_POWER, ValueKind::Complex, "kW")
            .expect("register");
        bus.register_subscription(TRANS_VOLTAGE, "pu").expect("register");
        bus.register_subscription(MARKET_PRICE, "$/MWh").expect("register");
        bus
    }

    #[test]
    fn time_requests_need_executing_mode() {
        let mut bus = bus();
        assert_eq!(bus.request_time(0.25), Err(BusError::NotExecuting));
        bus.enter_executing_mode().expect("enter");
        assert_eq!(bus.request_time(0.25), Ok(0.25));
    }

    #[test]
    fn peers_answer_after_grant() {
        let mut bus = bus();
        bus.enter_executing_mode().expect("enter");
        bus.request_time(0.25).expect("grant");
        assert_eq!(bus.latest(MARKET_PRICE), Some(BusValue::Double(40.0)));
        assert_eq!(bus.latest(TRANS_VOLTAGE), None);

        bus.publish(TOTAL_POWER, BusValue::Complex(ComplexPower::new(2000.0, 0.0)))
            .expect("publish");
        bus.request_time(0.5).expect("grant");
        let v = bus.latest(TRANS_VOLTAGE).map(|v| v.as_f64());
        assert_eq!(v, Some(1.0 - 1.0e-5 * 2000.0));
    }

    #[test]
    fn publish_checks_channel_and_kind() {
        let mut bus = bus();
        bus.enter_executing_mode().expect("enter");
        assert!(matches!(
            bus.publish("DER_Dist/unknown", BusValue::Double(1.0)),
            Err(BusError::UnknownChannel(_))
        ));
        assert!(matches!(
            bus.publish(TOTAL_POWER, BusValue::Double(1.0)),
            Err(BusError::KindMismatch { .. })
        ));
        assert!(bus.history().is_empty());
    }

    #[test]
    fn backwards_request_is_denied() {
        let mut bus = bus();
        bus.enter_executing_mode().expect("enter");
        bus.request_time(1.0).expect("grant");
        assert!(matches!(bus.request_time(0.5), Err(BusError::TimeDenied { .. })));
    }

    #[test]
    fn queued_faults_fire_once_each() {
        let mut bus = bus();
        bus.enter_executing_mode().expect("enter");
        bus.queue_request_error(BusError::Timeout("peer busy".into()));
        assert!(bus.request_time(0.25).is_err());
        assert_eq!(bus.request_time(0.25), Ok(0.25));
    }

    #[test]
    fn short_grants_fall_behind_the_request_once() {
        let mut bus = bus();
        bus.enter_executing_mode().expect("enter");
        bus.queue_short_grant(0.25);
        assert_eq!(bus.request_time(0.5), Ok(0.25));
        assert_eq!(bus.granted_hr(), 0.25);
        assert_eq!(bus.request_time(0.75), Ok(0.75));
        // never behind the previous grant
        bus.queue_short_grant(0.5);
        assert_eq!(bus.request_time(1.0), Ok(0.75));
    }

    #[test]
    fn finalize_closes_the_bus() {
        let mut bus = bus();
        bus.enter_executing_mode().expect("enter");
        bus.finalize().expect("finalize");
        assert!(bus.is_finalized());
        assert!(bus.request_time(0.25).is_err());
        assert_eq!(bus.units(TRANS_VOLTAGE), Some("pu"));
    }
}
