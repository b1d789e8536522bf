// SPDX-License-Identifier: Apache-2.0

//! Emberless daemon
//!
//! Wires the lifecycle core together and serves the invocation ingress:
//! loads and validates configuration, connects the container runtime,
//! reconciles orphaned backends from a previous run, starts the idle
//! eviction sweep, and listens for invocation requests.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use emberless_core::{
    spawn_idle_sweeper, ConfigLoader, DockerRuntime, FunctionRegistry, Invoker, InvokerSettings,
    LifecycleManager, LifecycleSettings,
};

mod server;

/// Emberless - self-hosted, container-backed serverless function platform
#[derive(Parser)]
#[command(name = "emberless")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "emberless.yaml")]
    config: String,

    /// Address the invocation ingress listens on
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let config = ConfigLoader::load_file(&cli.config)?;
    tracing::info!(
        functions = config.functions.len(),
        network = %config.daemon.network,
        "Configuration loaded"
    );

    let registry = Arc::new(FunctionRegistry::from_functions(config.functions)?);
    let runtime = Arc::new(DockerRuntime::connect().await?);

    let manager = Arc::new(LifecycleManager::new(
        runtime,
        LifecycleSettings::from_daemon(&config.daemon),
    ));

    // Reclaim backends a previous daemon left behind before serving traffic.
    manager.prune_orphans().await;

    let sweeper = spawn_idle_sweeper(
        Arc::clone(&manager),
        Duration::from_secs(config.daemon.sweep_interval_secs),
        Duration::from_secs(config.daemon.idle_timeout_secs),
    );

    let invoker = Arc::new(Invoker::new(
        registry,
        manager,
        InvokerSettings::from_daemon(&config.daemon),
    ));

    let result = server::serve(
        &cli.listen,
        invoker,
        Duration::from_secs(config.daemon.invoke_timeout_secs),
    )
    .await;

    sweeper.abort();
    result
}
