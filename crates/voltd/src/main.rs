//! voltd — the voltgrid demo driver.
//!
//! Loads a fleet description and a workload trace, pumps the
//! simulated host's events through the scheduler, and prints the
//! end-of-run SLA/energy report.
//!
//! # Usage
//!
//! ```text
//! voltd run --fleet demos/smallfleet/fleet.toml --trace demos/smallfleet/trace.toml
//! voltd run --fleet fleet.toml --trace trace.toml --policy load-aware
//! voltd policies
//! ```

mod driver;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::driver::{FleetFile, TraceFile};

#[derive(Parser)]
#[command(name = "voltd", about = "voltgrid workload scheduler driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a simulation to completion and print the report.
    Run {
        /// Fleet description (machines + scheduler tunables), TOML.
        #[arg(long)]
        fleet: PathBuf,

        /// Workload trace (task arrivals), TOML.
        #[arg(long)]
        trace: PathBuf,

        /// Override the placement policy from the fleet file.
        #[arg(long)]
        policy: Option<String>,
    },

    /// List the available placement policies.
    Policies,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { fleet, trace, policy } => {
            let fleet_text = std::fs::read_to_string(&fleet)?;
            let mut fleet_file: FleetFile = toml::from_str(&fleet_text)?;
            let trace_text = std::fs::read_to_string(&trace)?;
            let trace_file: TraceFile = toml::from_str(&trace_text)?;

            if let Some(policy) = policy {
                fleet_file.scheduler.policy = policy;
            }
            info!(
                machines = fleet_file.machines.len(),
                tasks = trace_file.tasks.len(),
                policy = %fleet_file.scheduler.policy,
                "starting simulation"
            );

            let report = driver::run(fleet_file, trace_file)?;
            println!("{report}");
            Ok(())
        }
        Command::Policies => {
            for name in voltgrid_placement::policy_names() {
                println!("{name}");
            }
            Ok(())
        }
    }
}
