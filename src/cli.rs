// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: One subcommand per loop, plus `all` and configuration checking.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "storage-operator")]
#[command(about = "Reconciliation daemons for per-tenant storage gateways")]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file (default: discover operator.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone, Copy)]
pub struct RunArgs {
    /// Run a single iteration and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Promote awaiting hostnames and force-updated workers to ready
    Initializer(RunArgs),

    /// Deploy workers that are ready for deployment
    Deployer(RunArgs),

    /// Wait for deployments to become ready and publish them
    Waiter(RunArgs),

    /// Remove workloads of force-deleted workers
    Deleter(RunArgs),

    /// Flag stale, stuck or idle releases for update or deletion
    Updater(RunArgs),

    /// Run every loop in this process
    All(RunArgs),

    /// Validate the configuration and exit
    CheckConfig,
}
