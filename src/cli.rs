use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, propagate_version = true)]
pub struct Args {
    /// Default log filter, overridden by `RUST_LOG`.
    #[clap(long, default_value = "info", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a co-simulation scenario against the in-process federation.
    #[clap(name = "run")]
    Run(Box<RunArgs>),

    /// Sweep PV penetration on a stylised feeder and print the results.
    #[clap(name = "penetration")]
    Penetration(PenetrationArgs),

    /// List the built-in scenario presets.
    #[clap(name = "presets")]
    Presets,
}

#[derive(Parser)]
pub struct RunArgs {
    /// Scenario TOML file.
    #[clap(long, conflicts_with = "preset")]
    pub scenario: Option<PathBuf>,

    /// Built-in preset name, `baseline` when neither this nor `--scenario` is given.
    #[clap(long)]
    pub preset: Option<String>,

    /// Override the random seed.
    #[clap(long)]
    pub seed: Option<u64>,

    /// Override the stop time (hours).
    #[clap(long)]
    pub stop_hours: Option<f64>,

    /// Write step results to this CSV file.
    #[clap(long)]
    pub telemetry_out: Option<PathBuf>,

    /// Print only the KPI report.
    #[clap(long)]
    pub quiet: bool,
}

#[derive(Parser)]
pub struct PenetrationArgs {
    /// PV capacity levels as a percentage of peak load.
    #[clap(long, value_delimiter = ',', default_value = "0,25,50,75,100,125")]
    pub levels: Vec<f64>,

    /// Feeder peak load (kW).
    #[clap(long, default_value = "1000")]
    pub base_load_kw: f64,

    /// Voltage change per kW of net import (pu/kW).
    #[clap(long, default_value = "0.00005")]
    pub sensitivity: f64,

    /// Sampling interval over the day (hours).
    #[clap(long, default_value = "1")]
    pub step_hours: f64,
}
