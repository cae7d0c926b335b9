//! accel-agent — the per-node accelerator daemon.
//!
//! Discovers one accelerator family, keeps the CDI registry and the
//! prepared-claims ledger in step with allocations, publishes the device
//! pool, and serves claim requests over HTTP.
//!
//! # Usage
//!
//! ```text
//! accel-agent --config /etc/accel-agent.toml --node-name worker-3 qat
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use accel_agent::{build_router, telemetry_snapshot, ApiState, FilePublisher};
use accel_cdi::Registry;
use accel_core::{AgentConfig, Family, NamingStyle};
use accel_health::{FileMarkerStore, HealthMonitor, HealthPolicy, JsonFileSource, TelemetrySource};
use accel_ledger::Ledger;
use accel_node::{NodeSettings, NodeState};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "accel-agent", about = "Accelerator resource agent")]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Overrides {
    /// Agent configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "NODE_NAME")]
    node_name: Option<String>,

    #[arg(long, global = true, env = "SYSFS_ROOT")]
    sysfs_root: Option<PathBuf>,

    #[arg(long, global = true)]
    cdi_root: Option<PathBuf>,

    /// Directory for the ledger and published inventory.
    #[arg(long, global = true)]
    plugin_dir: Option<PathBuf>,

    /// `machine` or `classic`.
    #[arg(long, global = true)]
    naming_style: Option<NamingStyle>,

    #[arg(long, global = true)]
    listen: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Manage Gaudi accelerators.
    Gaudi,
    /// Manage GPUs.
    Gpu,
    /// Manage QAT virtual functions.
    Qat {
        /// Allow idle PFs to change service profile.
        #[arg(long)]
        allow_reconfiguration: bool,
    },
}

impl Overrides {
    fn load(&self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_file(path)?,
            None => AgentConfig::default(),
        };
        if let Some(v) = &self.node_name {
            config.node_name = v.clone();
        }
        if let Some(v) = &self.sysfs_root {
            config.sysfs_root = v.clone();
        }
        if let Some(v) = &self.cdi_root {
            config.cdi_root = v.clone();
        }
        if let Some(v) = &self.plugin_dir {
            config.plugin_dir = Some(v.clone());
        }
        if let Some(v) = self.naming_style {
            config.naming_style = v;
        }
        if let Some(v) = &self.listen {
            config.listen = v.clone();
        }
        Ok(config)
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,accel_agent=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = cli.overrides.load()?;
    let family = match cli.command {
        Command::Gaudi => Family::Gaudi,
        Command::Gpu => Family::Gpu,
        Command::Qat {
            allow_reconfiguration,
        } => {
            config.qat.allow_reconfiguration |= allow_reconfiguration;
            Family::Qat
        }
    };

    run(config, family).await
}

async fn run(config: AgentConfig, family: Family) -> anyhow::Result<()> {
    info!(%family, node = %config.node_name, "accel-agent starting");

    // ── Persistent state ───────────────────────────────────────

    let plugin_dir = config.plugin_dir(family);
    std::fs::create_dir_all(&plugin_dir)
        .with_context(|| format!("creating {}", plugin_dir.display()))?;
    let ledger_path = config.ledger_path(family);
    let ledger = Ledger::open(&ledger_path)
        .with_context(|| format!("opening ledger {}", ledger_path.display()))?;
    let registry = Registry::open(&config.cdi_root)
        .with_context(|| format!("opening CDI registry {}", config.cdi_root.display()))?;

    // ── Discovery ──────────────────────────────────────────────

    let telemetry: Option<Arc<dyn TelemetrySource>> = match (&config.health.telemetry_path, family) {
        (Some(path), Family::Gpu) => Some(Arc::new(JsonFileSource::new(path))),
        _ => None,
    };
    let snapshot = telemetry_snapshot(telemetry.as_deref());
    let inventory = accel_discovery::discover(family, &config.sysfs_root, config.naming_style, &snapshot);
    info!(devices = inventory.len(), "discovery complete");

    let node = NodeState::start(
        NodeSettings::from_config(&config, family),
        inventory,
        registry,
        ledger,
        Arc::new(FilePublisher::new(&plugin_dir)),
    )
    .await?;

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor_handle = match (&telemetry, config.health.enabled) {
        (Some(source), true) => {
            let marker_dir = config
                .health
                .marker_dir
                .clone()
                .unwrap_or_else(|| plugin_dir.join("markers"));
            let monitor = HealthMonitor::new(
                node.clone(),
                source.clone(),
                Arc::new(FileMarkerStore::new(marker_dir)),
                HealthPolicy {
                    interval: config.health.interval(),
                    ignore_warning: config.health.ignore_warning,
                },
            );
            Some(monitor.spawn(shutdown_rx.clone()))
        }
        (None, true) => {
            warn!("health monitoring enabled without a telemetry source, skipping");
            None
        }
        _ => None,
    };

    // ── API server ─────────────────────────────────────────────

    let router = build_router(ApiState {
        node,
        sysfs_root: config.sysfs_root.clone(),
        naming: config.naming_style,
        telemetry,
    });
    let addr: SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = monitor_handle {
        let _ = handle.await;
    }
    info!("accel-agent stopped");
    Ok(())
}
