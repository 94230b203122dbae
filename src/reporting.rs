//! Plain-text reports printed by the binary.

use std::fmt::Write;

use crate::study::PenetrationResult;

/// Renders the penetration sweep as a fixed-width table.
pub fn penetration_table(results: &[PenetrationResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "--- PV Penetration Study ---");
    let _ = writeln!(
        out,
        "{:>8} {:>10} {:>12} {:>12} {:>14} {:>12}",
        "PV %", "PV kW", "max dV %", "reverse h", "curtailed kWh", "min net kW"
    );
    for r in results {
        let _ = writeln!(
            out,
            "{:>8.0} {:>10.0} {:>12.2} {:>12.1} {:>14.1} {:>12.1}",
            r.penetration_pct,
            r.pv_capacity_kw,
            r.max_voltage_deviation_pct,
            r.reverse_flow_hours,
            r.curtailed_energy_kwh,
            r.min_net_load_kw
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::study::PenetrationStudy;

    #[test]
    fn one_row_per_level() {
        let results = PenetrationStudy::default().run();
        let table = penetration_table(&results);
        // title + header + 6 levels
        assert_eq!(table.lines().count(), 8);
        assert!(table.lines().nth(7).unwrap_or("").trim_start().starts_with("125"));
    }
}
