//! CSV export for run logs.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::sim::types::StepResult;

/// Column header for CSV step export.
const HEADER: &str = "step,time_hr,hour_of_day,solar_kw,battery_command_kw,battery_kw,\
                       battery_soc,net_p_kw,net_q_kvar,voltage_pu,price_per_mwh,degraded";

fn optional(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(String::new, |v| format!("{v:.precision$}"))
}

/// Exports step results to a CSV file at the given path.
///
/// Writes a header row followed by one data row per step. Missing voltage or
/// price observations are written as empty fields. Produces deterministic
/// output for identical inputs.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(results: &[StepResult], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(results, buf)
}

/// Writes step results as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(results: &[StepResult], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);

    wtr.write_record(HEADER.split(',').map(str::trim))?;

    for r in results {
        wtr.write_record(&[
            r.step.to_string(),
            format!("{:.4}", r.time_hr),
            format!("{:.4}", r.hour_of_day),
            format!("{:.4}", r.solar_kw),
            format!("{:.4}", r.battery_command_kw),
            format!("{:.4}", r.battery_kw),
            format!("{:.6}", r.battery_soc),
            format!("{:.4}", r.net_p_kw),
            format!("{:.4}", r.net_q_kvar),
            optional(r.voltage_pu, 6),
            optional(r.price_per_mwh, 2),
            r.degraded.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
