//! Feeder power balance computation.

/// Computes net feeder import from aggregated injections.
///
/// Sign conventions:
/// - `load_kw` is consumption (positive)
/// - `generation_kw` is production magnitude (positive, subtracted)
/// - `storage_kw` follows the battery convention (positive=charge)
///
/// # Returns
///
/// Net feeder load in kW (positive=import, negative=reverse flow)
pub fn net_import_kw(load_kw: f64, generation_kw: f64, storage_kw: f64) -> f64 {
    load_kw - generation_kw + storage_kw
}

/// Returns `true` when the feeder exports toward the transmission system.
pub fn is_reverse_flow(net_kw: f64) -> bool {
    net_kw < 0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_only() {
        assert_eq!(net_import_kw(1600.0, 0.0, 0.0), 1600.0);
    }

    #[test]
    fn solar_reduces_import() {
        assert_eq!(net_import_kw(1600.0, 700.0, 0.0), 900.0);
    }

    #[test]
    fn battery_discharge_reduces_import() {
        assert_eq!(net_import_kw(1600.0, 0.0, -80.0), 1520.0);
    }

    #[test]
    fn surplus_generation_reverses_flow() {
        let net = net_import_kw(500.0, 900.0, 50.0);
        assert_eq!(net, -350.0);
        assert!(is_reverse_flow(net));
        assert!(!is_reverse_flow(0.0));
    }
}
