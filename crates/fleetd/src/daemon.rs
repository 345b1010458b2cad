//! `run` subcommand — assembles the provider, state store, and loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use fleet_core::ClusterSpec;
use fleetgrid_autoscale::{ReconcileLoop, Reconciler};
use fleetgrid_provider::{AccessPolicy, InMemoryProvider, PolicyGuard};
use fleetgrid_state::StateStore;
use tokio::sync::watch;
use tracing::{error, info, warn};

const LOCAL_PROVIDER: &str = "local";
const STATE_FILE: &str = "fleetgrid.redb";

pub async fn run(
    config: &Path,
    policy: Option<&Path>,
    state_dir: Option<PathBuf>,
    once: bool,
) -> anyhow::Result<()> {
    let spec = ClusterSpec::from_file(config)
        .with_context(|| format!("invalid cluster spec {}", config.display()))?;
    if spec.provider.kind != LOCAL_PROVIDER {
        bail!(
            "provider type {:?} is not supported by this build; use {LOCAL_PROVIDER:?}",
            spec.provider.kind
        );
    }

    let policy = match policy {
        Some(path) => AccessPolicy::from_file(path)
            .with_context(|| format!("invalid access policy {}", path.display()))?,
        None => AccessPolicy::least_privilege(),
    };
    for action in policy.missing_actions() {
        warn!(%action, iam_action = action.iam_action(), "access policy does not grant action");
    }

    info!(cluster = %spec.cluster_name, mode = ?spec.mode, "FleetGrid daemon starting");

    let interval = spec.settings.reconcile_interval;
    let state_dir = state_dir.or_else(|| spec.settings.state_dir.clone());
    let provider = Arc::new(PolicyGuard::new(InMemoryProvider::new(), policy));
    let reconciler = Reconciler::new(spec, provider);

    let lp = match state_dir {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(STATE_FILE);
            let store = StateStore::open(&path)?;
            info!(path = ?path, "state store opened");
            ReconcileLoop::with_store(reconciler, store)?
        }
        None => ReconcileLoop::new(reconciler),
    };

    if once {
        let report = lp.reconcile_once().await;
        println!(
            "target={} live_workers={} launched={} terminating={} errors={}",
            report.target.map_or(0, |d| d.target),
            report.live_workers,
            report.launched.len() + usize::from(report.head_launched.is_some()),
            report.terminating.len(),
            report.errors.len()
        );
        return Ok(());
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let lp = Arc::new(lp);
    let runner = Arc::clone(&lp);
    let loop_handle = tokio::spawn(async move {
        runner.run(interval, shutdown_rx).await;
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C, stopping");
    }
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    loop_handle.await?;

    for alert in lp.view().lock().await.alerts() {
        warn!(
            action = %alert.action,
            failures = alert.consecutive_failures,
            error = %alert.last_error,
            "alert still raised at shutdown"
        );
    }
    info!("FleetGrid daemon stopped");
    Ok(())
}
