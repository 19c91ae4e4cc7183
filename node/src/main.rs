// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # velock Node
//!
//! Entry point for the `velock-node` binary. Parses CLI arguments,
//! initializes logging and metrics, restores or deploys the engine, starts
//! the keeper, and serves the query API.
//!
//! The binary supports four subcommands:
//!
//! - `run`     : start the node
//! - `init`    : write a default config into a data directory
//! - `simulate`: run an offline scenario and print a JSON report
//! - `version` : print build version information

mod api;
mod cli;
mod config;
mod keeper;
mod logging;
mod metrics;
mod simulate;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;

use velock_contracts::Engine;
use velock_protocol::BlockContext;

use cli::{Commands, VelockNodeCli};
use config::{NodeConfig, CONFIG_FILE_NAME};
use keeper::Keeper;
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = VelockNodeCli::parse();
    let format = LogFormat::from_str_lossy(&cli.log_format);

    match cli.command {
        Commands::Run(args) => {
            logging::init_logging(logging::DEFAULT_FILTER, format);
            run_node(args).await
        }
        Commands::Init(args) => {
            logging::init_logging("velock_node=info", format);
            init_node(args)
        }
        Commands::Simulate(args) => {
            logging::init_logging("velock_node=warn", format);
            let report = simulate::run(&args)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Loads the config, applies flag overrides and validates the result.
fn load_config(args: &cli::RunArgs) -> Result<NodeConfig> {
    let mut config = NodeConfig::resolve(args.config.as_deref(), &args.data_dir)?;
    if let Some(port) = args.api_port {
        config.api_port = port;
    }
    if let Some(port) = args.metrics_port {
        config.metrics_port = port;
    }
    if let Some(secs) = args.keeper_interval {
        config.keeper_interval_secs = secs;
    }
    if let Some(secs) = args.snapshot_interval {
        config.snapshot_interval_secs = secs;
    }
    config.validate()?;
    Ok(config)
}

/// Restores the engine from its snapshot, or deploys a fresh one from the
/// config's genesis settings.
fn open_engine(config: &NodeConfig) -> Result<Engine> {
    let path = config.snapshot_path();
    if let Some(engine) = keeper::load_snapshot(&path)? {
        let last = engine.last_ctx();
        tracing::info!(
            path = %path.display(),
            timestamp = last.timestamp,
            height = last.height,
            "engine restored from snapshot"
        );
        return Ok(engine);
    }

    let ctx = BlockContext::new(keeper::wall_clock(), 0);
    let mut engine = Engine::new(
        config.admin,
        ctx,
        config.inflation.clone(),
        config.limits,
    )
    .context("failed to deploy engine")?;
    for gauge_type in &config.gauge_types {
        let type_id = engine
            .add_type(ctx, config.admin, &gauge_type.name, gauge_type.weight)
            .with_context(|| format!("failed to add gauge type {:?}", gauge_type.name))?;
        tracing::info!(type_id, name = %gauge_type.name, "gauge type created");
    }
    for gauge in &config.gauges {
        engine
            .add_gauge(ctx, config.admin, gauge.address, gauge.type_id, gauge.weight)
            .with_context(|| format!("failed to add gauge {}", gauge.address))?;
    }
    Ok(engine)
}

/// Starts the node: API server, metrics endpoint, and keeper.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let config = load_config(&args)?;
    tracing::info!(
        api_port = config.api_port,
        metrics_port = config.metrics_port,
        data_dir = %config.data_dir.display(),
        "starting velock-node"
    );

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!("failed to create data directory: {}", config.data_dir.display())
    })?;

    let engine = Arc::new(RwLock::new(open_engine(&config)?));
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    node_metrics.observe_status(&engine.read().status(keeper::wall_clock()));

    let api_keeper = Arc::new(Keeper::new(
        Arc::clone(&engine),
        Arc::clone(&node_metrics),
        config.max_rounds_per_tick,
    ));
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        keeper: api_keeper,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", config.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", config.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Keeper ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let keeper = Keeper::new(
        Arc::clone(&engine),
        Arc::clone(&node_metrics),
        config.max_rounds_per_tick,
    );
    let keeper_task = tokio::spawn(keeper.run(
        Duration::from_secs(config.keeper_interval_secs),
        Duration::from_secs(config.snapshot_interval_secs),
        config.snapshot_path(),
        shutdown_rx,
    ));

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown signal received");
        }
    }

    // A send error means the keeper already exited; its result says why.
    let _ = shutdown_tx.send(true);
    keeper_task.await.context("keeper task panicked")??;
    tracing::info!("velock-node stopped");
    Ok(())
}

/// Writes a default `config.toml` into the data directory.
fn init_node(args: cli::InitArgs) -> Result<()> {
    let data_dir = &args.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let path = data_dir.join(CONFIG_FILE_NAME);
    anyhow::ensure!(
        args.force || !path.exists(),
        "{} already exists (use --force to overwrite)",
        path.display()
    );
    let config = NodeConfig {
        data_dir: data_dir.clone(),
        ..NodeConfig::default()
    };
    std::fs::write(&path, config.to_toml()?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "default configuration written");

    println!("Node initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Config         : {}", path.display());
    println!("  Admin          : {}", config.admin);
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("velock-node {}", env!("CARGO_PKG_VERSION"));
    println!(
        "snapshot    v{}",
        velock_contracts::engine::SNAPSHOT_VERSION
    );
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => res.context("failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    Ok(())
}
