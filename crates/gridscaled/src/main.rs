//! gridscaled — the GridScale daemon.
//!
//! Single binary that assembles the synchronization stack:
//! - State authority (redb-backed)
//! - HTTP/JSON protocol surface
//! - In-process autoscaler reporter loop
//!
//! # Usage
//!
//! ```text
//! gridscaled standalone --port 8790 --data-dir /var/lib/gridscale \
//!     --node-type standard=CPU:8,memory:32 --node-type gpu=CPU:16,GPU:4
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use gridscale_authority::StateAuthority;
use gridscale_model::ResourceMap;
use gridscale_reporter::{LocalSyncClient, NodeTypeSpec, Reporter};

#[derive(Parser)]
#[command(name = "gridscaled", about = "GridScale daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run authority, API, and reporter in one process.
    Standalone {
        /// Port to listen on.
        #[arg(long, default_value = "8790")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/gridscale")]
        data_dir: PathBuf,

        /// Reporter sync interval in seconds.
        #[arg(long, default_value = "15")]
        sync_interval: u64,

        /// Discard reports computed against snapshots more than this
        /// many versions behind. Unset means diagnostic only.
        #[arg(long)]
        staleness_bound: Option<u64>,

        /// Launchable node shape, e.g. `standard=CPU:8,memory:32`.
        /// Repeatable.
        #[arg(long = "node-type")]
        node_types: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gridscaled=debug,gridscale=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            sync_interval,
            staleness_bound,
            node_types,
        } => {
            run_standalone(port, data_dir, sync_interval, staleness_bound, node_types).await
        }
    }
}

async fn run_standalone(
    port: u16,
    data_dir: PathBuf,
    sync_interval: u64,
    staleness_bound: Option<u64>,
    node_type_args: Vec<String>,
) -> anyhow::Result<()> {
    info!("GridScale daemon starting in standalone mode");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("gridscale.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let mut authority = StateAuthority::open(&db_path).context("opening state authority")?;
    if let Some(bound) = staleness_bound {
        authority = authority.with_staleness_bound(bound);
    }
    info!(path = ?db_path, "state authority opened");

    let node_types = node_type_args
        .iter()
        .map(|arg| parse_node_type(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;
    info!(node_types = node_types.len(), "launchable node shapes configured");

    let mut reporter = Reporter::new(LocalSyncClient::new(authority.clone()), node_types);

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reporter_shutdown = shutdown_rx.clone();

    // ── Start background tasks ─────────────────────────────────

    let reporter_handle = tokio::spawn(async move {
        reporter
            .run(Duration::from_secs(sync_interval), reporter_shutdown)
            .await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = gridscale_api::build_router(authority);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = reporter_handle.await;

    info!("GridScale daemon stopped");
    Ok(())
}

/// Parse `name=RES:QTY,RES:QTY` into a node shape.
fn parse_node_type(arg: &str) -> anyhow::Result<NodeTypeSpec> {
    let Some((name, resources)) = arg.split_once('=') else {
        bail!("node type must look like name=CPU:8,memory:32, got {arg:?}");
    };

    let mut total_resources = ResourceMap::new();
    for pair in resources.split(',').filter(|p| !p.is_empty()) {
        let Some((res_name, qty)) = pair.split_once(':') else {
            bail!("resource must look like CPU:8, got {pair:?}");
        };
        let qty: f64 = qty
            .parse()
            .with_context(|| format!("invalid quantity in {pair:?}"))?;
        if qty < 0.0 {
            bail!("resource quantity must be non-negative, got {pair:?}");
        }
        total_resources.insert(res_name.to_string(), qty);
    }

    Ok(NodeTypeSpec {
        name: name.to_string(),
        total_resources,
        labels: HashMap::new(),
    })
}
