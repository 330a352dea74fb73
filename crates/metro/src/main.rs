//! metro - operator CLI for Metronome
//!
//! Subcommands:
//! - `metro masters` - Resolved clock master of every device
//! - `metro model [--json]` - Current media clock domain model
//! - `metro plan --target <file>` - Phases needed to reach a target layout
//! - `metro apply --target <file>` - Drive the simulated network to a target
//! - `metro config` - Effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use metroconf::MetroConfig;

use metro::commands::{self, Session};
use metro::telemetry;

#[derive(Parser)]
#[command(name = "metro")]
#[command(about = "Media clock domain management over a fleet snapshot")]
#[command(version)]
struct Cli {
    /// Config file replacing ./metronome.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Fleet snapshot (JSON), overrides paths.fleet_file
    #[arg(long, global = true)]
    fleet: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the clock master of every device
    Masters,

    /// Show the current media clock domain model
    Model {
        /// Print as a target layout in JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the phases needed to reach a target layout
    Plan {
        /// Target layout (JSON), overrides paths.target_file
        #[arg(short, long)]
        target: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Apply a target layout through the simulated network
    Apply {
        /// Target layout (JSON), overrides paths.target_file
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Write the resulting fleet back to the fleet file
        #[arg(short, long)]
        write: bool,
    },

    /// Show the effective configuration and its sources
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) =
        MetroConfig::load_with_sources_from(cli.config.as_deref()).context("Failed to load configuration")?;
    telemetry::init(&config.infra.telemetry.log_level);

    let fleet = cli.fleet.as_deref();
    let output = match cli.command {
        Commands::Config => commands::config(&config, &sources),
        Commands::Masters => commands::masters(&Session::open(config, fleet)?),
        Commands::Model { json } => commands::model(&Session::open(config, fleet)?, json)?,
        Commands::Plan { target, json } => {
            commands::plan(&Session::open(config, fleet)?, target.as_deref(), json)?
        }
        Commands::Apply { target, write } => {
            commands::apply(&Session::open(config, fleet)?, target.as_deref(), write).await?
        }
    };
    print!("{}", output);

    Ok(())
}
