// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Child Chain Operator Node
//!
//! Entry point for the `childchain-node` binary. Parses CLI arguments,
//! initializes logging and metrics, recovers the stage lifecycle from disk,
//! and serves the HTTP/WS API.
//!
//! - `run`     — start the operator node
//! - `inspect` — print what the database holds, offline
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use childchain_protocol::config::StageConfig;
use childchain_protocol::stage::{LoopbackParentChain, RootHashes, StageLifecycle, StageStore};
use childchain_protocol::storage::SettlementDb;
use childchain_protocol::transaction::address_field;

use cli::{ChildChainCli, Commands};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Broadcast channel capacity for live event streaming.
const EVENT_CHANNEL_CAPACITY: usize = 256;

const DEFAULT_LOG_FILTER: &str = "childchain_node=info,childchain_protocol=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ChildChainCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Inspect(args) => inspect(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn open_db(data_dir: &Path) -> Result<SettlementDb> {
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;
    SettlementDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))
}

/// Starts the operator node: recovers state, then serves the API and the
/// metrics endpoint until SIGINT/SIGTERM.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(DEFAULT_LOG_FILTER, LogFormat::from_str_lossy(&args.log_format))
        .context("failed to initialize logging")?;

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        tree_height = args.tree_height,
        data_dir = %args.data_dir.display(),
        "starting childchain-node"
    );

    // --- Persistent storage ---
    let db = Arc::new(open_db(&args.data_dir)?);
    tracing::info!(
        stages = db.stage_count(),
        receipts = db.receipt_count(),
        pending = db.pending_count(),
        "database opened"
    );

    // --- Lifecycle ---
    let config = StageConfig {
        tree_height: args.tree_height,
        commit_account_tree: !args.no_account_tree,
        operator_address: address_field(&args.operator_address)
            .context("invalid --operator-address")?,
    };
    let store: Arc<dyn StageStore> = db.clone();
    let lifecycle = Arc::new(
        StageLifecycle::open(config, store).context("failed to recover stage lifecycle")?,
    );

    // --- Parent chain ---
    let mut history: Vec<(u64, RootHashes)> = Vec::new();
    for height in db.stage_heights()? {
        if let Some(record) = db.load_stage(height)? {
            history.push((height, record.roots));
        }
    }
    let chain = Arc::new(LoopbackParentChain::with_history(history));
    tracing::warn!("no parent-chain client configured, using in-process loopback chain");
    lifecycle
        .reconcile(chain.as_ref())
        .await
        .context("parent chain disagrees with local stages")?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        operator_address: args.operator_address.clone(),
        sidechain_address: args.sidechain_address.clone(),
        lifecycle: Arc::clone(&lifecycle),
        chain,
        event_tx,
        metrics: Arc::clone(&node_metrics),
    };
    app_state.refresh_gauges();

    let status = lifecycle.status();
    tracing::info!(
        committed_height = status.committed_height,
        open_stage = status.open_stage,
        pending = status.pending_receipts,
        next_gsn = status.next_gsn,
        "lifecycle recovered"
    );

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind RPC listener on {}", api_addr))?;
    tracing::info!("RPC/API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

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
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    db.flush().context("failed to flush database")?;
    tracing::info!("childchain-node stopped");
    Ok(())
}

/// Prints one stage, or the list of committed stages.
fn inspect(args: cli::InspectArgs) -> Result<()> {
    let db = open_db(&args.data_dir)?;

    let Some(stage_height) = args.stage else {
        println!("committed height : {}", db.committed_height()?);
        println!("pending receipts : {}", db.pending_count());
        println!("accounts         : {}", db.account_count());
        for height in db.stage_heights()? {
            if let Some(record) = db.load_stage(height)? {
                println!(
                    "  stage {:>6}  receipts {:>6}  root {}",
                    height,
                    record.receipt_count(),
                    record.roots.receipt_root
                );
            }
        }
        return Ok(());
    };

    let record = db
        .load_stage(stage_height)?
        .with_context(|| format!("stage {} is not committed", stage_height))?;
    let tree = record.receipt_tree().context("stored receipt tree is corrupt")?;

    println!("stage            : {}", record.stage_height);
    println!("committed at     : {}", record.committed_at.to_rfc3339());
    println!("parent tx        : {}", record.parent_tx_hash.as_deref().unwrap_or("-"));
    println!("receipt root     : {}", record.roots.receipt_root);
    println!("account root     : {}", record.roots.account_root.as_deref().unwrap_or("-"));
    println!("receipts         : {}", record.receipt_count());
    println!("GSN range        : {}", gsn_range(&record.gsns));
    println!("max collision    : {}", tree.max_collision_count());
    println!("avg collision    : {:.3}", tree.average_collision_count());
    Ok(())
}

fn gsn_range(gsns: &[u64]) -> String {
    match (gsns.first(), gsns.last()) {
        (Some(first), Some(last)) => format!("{}..={}", first, last),
        _ => "-".to_string(),
    }
}

/// Prints version information to stdout.
fn print_version() {
    println!("childchain-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc           {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// If a handler cannot be installed, that branch never fires and the other
/// one still can.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
