//! Stand-in federates that run inside an [`InProcessBus`](super::InProcessBus).

use std::collections::BTreeMap;

use super::bus::{BusValue, MARKET_PRICE, TOTAL_POWER, TRANS_VOLTAGE};

/// A federate simulated in-process.
pub trait Peer {
    fn name(&self) -> &str;

    /// Reacts to a time grant.
    ///
    /// # Arguments
    ///
    /// * `time_hr` - Granted simulation time
    /// * `published` - Latest value on every channel at the moment of the grant
    ///
    /// # Returns
    ///
    /// Values the peer publishes for this grant, keyed by channel.
    fn on_grant(
        &mut self,
        time_hr: f64,
        published: &BTreeMap<String, BusValue>,
    ) -> Vec<(String, BusValue)>;
}

/// Transmission system seen from the feeder head: voltage sags linearly with
/// the published net import.
#[derive(Debug, Clone)]
pub struct TransmissionProxy {
    pub base_pu: f64,
    /// Voltage drop per kW of published net import (pu/kW).
    pub sensitivity_pu_per_kw: f64,
}

impl TransmissionProxy {
    pub fn new(base_pu: f64, sensitivity_pu_per_kw: f64) -> Self {
        Self {
            base_pu,
            sensitivity_pu_per_kw,
        }
    }

    pub fn voltage_pu(&self, net_import_kw: f64) -> f64 {
        self.base_pu - self.sensitivity_pu_per_kw * net_import_kw
    }
}

impl Peer for TransmissionProxy {
    fn name(&self) -> &str {
        "transmission"
    }

    fn on_grant(
        &mut self,
        _time_hr: f64,
        published: &BTreeMap<String, BusValue>,
    ) -> Vec<(String, BusValue)> {
        // silent until the feeder has published once
        match published.get(TOTAL_POWER) {
            Some(value) => vec![(
                TRANS_VOLTAGE.to_string(),
                BusValue::Double(self.voltage_pu(value.as_f64())),
            )],
            None => Vec::new(),
        }
    }
}

/// Market price source: a flat price with an adder across the evening peak.
#[derive(Debug, Clone)]
pub struct PriceCurve {
    pub base_per_mwh: f64,
    pub peak_adder_per_mwh: f64,
    /// Peak window as `[start, end)` hours of day.
    pub peak_window: (f64, f64),
}

impl PriceCurve {
    pub fn price_at(&self, hour_of_day: f64) -> f64 {
        let (start, end) = self.peak_window;
        if hour_of_day >= start && hour_of_day < end {
            self.base_per_mwh + self.peak_adder_per_mwh
        } else {
            self.base_per_mwh
        }
    }
}

impl Peer for PriceCurve {
    fn name(&self) -> &str {
        "market"
    }

    fn on_grant(
        &mut self,
        time_hr: f64,
        _published: &BTreeMap<String, BusValue>,
    ) -> Vec<(String, BusValue)> {
        let price = self.price_at(time_hr.rem_euclid(24.0));
        vec![(MARKET_PRICE.to_string(), BusValue::Double(price))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::types::ComplexPower;

    #[test]
    fn transmission_waits_for_first_publication() {
        let mut proxy = TransmissionProxy::new(1.0, 1.0e-6);
        assert!(proxy.on_grant(0.25, &BTreeMap::new()).is_empty());
    }

    #[test]
    fn voltage_sags_with_import_and_rises_with_export() {
        let mut proxy = TransmissionProxy::new(1.0, 1.0e-6);
        let mut published = BTreeMap::new();
        published.insert(
            TOTAL_POWER.to_string(),
            BusValue::Complex(ComplexPower::new(30_000.0, 7_600.0)),
        );
        let out = proxy.on_grant(0.5, &published);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, TRANS_VOLTAGE);
        assert!((out[0].1.as_f64() - 0.97).abs() < 1e-12);
        assert!(proxy.voltage_pu(-10_000.0) > 1.0);
    }

    #[test]
    fn price_follows_peak_window() {
        let curve = PriceCurve {
            base_per_mwh: 40.0,
            peak_adder_per_mwh: 60.0,
            peak_window: (17.0, 21.0),
        };
        assert_eq!(curve.price_at(12.0), 40.0);
        assert_eq!(curve.price_at(17.0), 100.0);
        assert_eq!(curve.price_at(21.0), 40.0);

        let mut curve = curve;
        let out = curve.on_grant(42.0, &BTreeMap::new());
        // 42 h wraps to 18:00
        assert_eq!(out[0].1, BusValue::Double(100.0));
    }
}
