//! DER co-simulation entry point: CLI wiring and config-driven runs.

mod cli;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use der_cosim::config::{ScenarioConfig, join_errors};
use der_cosim::io::export::export_csv;
use der_cosim::reporting::penetration_table;
use der_cosim::runner::run_scenario;
use der_cosim::study::PenetrationStudy;
use der_cosim::telemetry::init_tracing;

use crate::cli::{Args, Command, PenetrationArgs, RunArgs};

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log);

    match args.command {
        Command::Run(run) => run_command(&run),
        Command::Penetration(p) => penetration_command(&p),
        Command::Presets => {
            for name in ScenarioConfig::PRESETS {
                println!("{name}");
            }
            Ok(())
        }
    }
}

/// Loads the scenario: `--scenario` takes priority, then `--preset`, then baseline.
fn load_scenario(args: &RunArgs) -> Result<ScenarioConfig> {
    let mut scenario = if let Some(path) = &args.scenario {
        ScenarioConfig::from_toml_file(path)
            .with_context(|| format!("failed to load scenario {}", path.display()))?
    } else if let Some(name) = &args.preset {
        ScenarioConfig::from_preset(name)?
    } else {
        ScenarioConfig::baseline()
    };

    if let Some(seed) = args.seed {
        scenario.simulation.seed = seed;
    }
    if let Some(stop) = args.stop_hours {
        scenario.simulation.stop_hours = stop;
    }

    let errors = scenario.validate();
    if !errors.is_empty() {
        bail!("invalid scenario:\n{}", join_errors(&errors));
    }
    Ok(scenario)
}

fn run_command(args: &RunArgs) -> Result<()> {
    let scenario = load_scenario(args)?;
    info!(
        federate = %scenario.cosim.federate_name,
        stop_hours = scenario.simulation.stop_hours,
        policy = scenario.dispatch.policy.as_str(),
        "starting run"
    );

    let summary = run_scenario(&scenario)?;

    if !args.quiet {
        for r in summary.log.iter() {
            println!("{r}");
        }
        println!();
    }
    println!("{}", summary.kpi);
    for (site, soc) in &summary.final_soc {
        println!("Final SoC {site}: {:.1}%", soc * 100.0);
    }

    if let Some(path) = &args.telemetry_out {
        export_csv(summary.log.as_slice(), path)
            .with_context(|| format!("failed to write CSV to {}", path.display()))?;
        info!(path = %path.display(), "telemetry written");
    }
    Ok(())
}

fn penetration_command(args: &PenetrationArgs) -> Result<()> {
    let study = PenetrationStudy {
        base_load_kw: args.base_load_kw,
        levels_pct: args.levels.clone(),
        voltage_sensitivity_pu_per_kw: args.sensitivity,
        step_hours: args.step_hours,
    };
    study.validate().context("invalid penetration study")?;
    print!("{}", penetration_table(&study.run()));
    Ok(())
}
