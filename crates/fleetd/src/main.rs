//! fleetd — the FleetGrid daemon.
//!
//! Validates cluster spec files, scaffolds new ones, and runs the
//! autoscaler control loop for a cluster.
//!
//! # Usage
//!
//! ```text
//! fleetd scaffold --name demo --output cluster.toml
//! fleetd validate --config cluster.toml --policy policy.json
//! fleetd run --config cluster.toml --state-dir /var/lib/fleetgrid
//! ```

mod check;
mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid autoscaler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a cluster spec file, and optionally an access policy.
    Validate {
        /// Cluster spec file (TOML, or JSON by extension).
        #[arg(long)]
        config: PathBuf,

        /// IAM-style access policy to check against the required actions.
        #[arg(long)]
        policy: Option<PathBuf>,
    },

    /// Print a starter cluster spec for the local provider.
    Scaffold {
        /// Cluster name.
        #[arg(long)]
        name: String,

        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Run the reconciliation loop until Ctrl-C.
    Run {
        /// Cluster spec file.
        #[arg(long)]
        config: PathBuf,

        /// Access policy; defaults to the least-privilege policy.
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Directory for persistent state; overrides `autoscaler.state_dir`.
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,fleetd=debug,fleetgrid=debug")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { config, policy } => check::validate(&config, policy.as_deref()),
        Command::Scaffold { name, output } => check::scaffold(&name, output.as_deref()),
        Command::Run {
            config,
            policy,
            state_dir,
            once,
        } => daemon::run(&config, policy.as_deref(), state_dir, once).await,
    }
}
