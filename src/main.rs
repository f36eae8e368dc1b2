// ABOUTME: Entry point for the storage-operator daemon.
// ABOUTME: Loads configuration, wires store, API and backend, and runs the selected loops.

mod cli;

use clap::Parser;
use cli::{Cli, Commands, RunArgs};
use futures::future::join_all;
use std::env;
use std::sync::Arc;
use storage_operator::backend::HelmBackend;
use storage_operator::config::OperatorConfig;
use storage_operator::error::Result;
use storage_operator::http::HttpClient;
use storage_operator::loops::{LoopContext, LoopKind, run_loop};
use storage_operator::shutdown::Shutdown;
use storage_operator::store::StateStore;
use storage_operator::volume_config::HttpConfigApi;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    let (kinds, args): (Vec<LoopKind>, RunArgs) = match cli.command {
        Commands::CheckConfig => {
            println!(
                "Configuration valid: zone {}, api {}",
                config.cluster.zone, config.api.url
            );
            return Ok(());
        }
        Commands::Initializer(args) => (vec![LoopKind::Initializer], args),
        Commands::Deployer(args) => (vec![LoopKind::Deployer], args),
        Commands::Waiter(args) => (vec![LoopKind::Waiter], args),
        Commands::Deleter(args) => (vec![LoopKind::Deleter], args),
        Commands::Updater(args) => (vec![LoopKind::Updater], args),
        Commands::All(args) => (LoopKind::ALL.to_vec(), args),
    };
    if kinds.len() == 1 {
        config.store.require_shared()?;
    }

    tracing::info!(
        host = %gethostname::gethostname().to_string_lossy(),
        zone = %config.cluster.zone,
        loops = ?kinds.iter().map(LoopKind::as_str).collect::<Vec<_>>(),
        "starting storage operator"
    );

    let config = Arc::new(config);
    let http = HttpClient::new()?;
    let api = HttpConfigApi::from_config(&config.api, http.clone())?;
    let ctx = LoopContext::new(
        config.clone(),
        StateStore::from_config(&config.store),
        Arc::new(api),
        Arc::new(HelmBackend::new(config.backend.clone(), http)),
    );

    let shutdown = Shutdown::new();
    let _signals = shutdown.listen_for_signals()?;

    let runs = kinds.iter().map(|kind| {
        let reconciler = kind.build(&ctx);
        let interval = kind.interval(&config);
        let shutdown = shutdown.clone();
        async move { run_loop(reconciler.as_ref(), interval, &shutdown, args.once).await }
    });

    for result in join_all(runs).await {
        result?;
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<OperatorConfig> {
    match &cli.config {
        Some(path) => OperatorConfig::load(path),
        None => OperatorConfig::discover(&env::current_dir()?),
    }
}
