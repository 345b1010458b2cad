//! ReconcileLoop — runs the reconciler on a fixed interval.
//!
//! At most one cycle runs at a time. A tick that fires while the previous
//! cycle is still in flight is skipped, never queued. After every cycle the
//! view is written to the state store when one is configured.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fleet_core::{EpochSecs, NodeRecord};
use fleetgrid_provider::ProviderClient;
use fleetgrid_state::{StateResult, StateStore};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::reconciler::{CycleReport, Reconciler};
use crate::view::ClusterView;

/// Result of asking for a cycle without waiting.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle held the view.
    Skipped,
}

pub struct ReconcileLoop<P> {
    reconciler: Arc<Reconciler<P>>,
    view: Arc<Mutex<ClusterView>>,
    store: Option<StateStore>,
}

impl<P: ProviderClient + 'static> ReconcileLoop<P> {
    /// A loop with no persistence. The first cycle is treated as the
    /// cluster's first ever.
    pub fn new(reconciler: Reconciler<P>) -> Self {
        let view = reconciler.new_view();
        Self {
            reconciler: Arc::new(reconciler),
            view: Arc::new(Mutex::new(view)),
            store: None,
        }
    }

    /// A loop that restores its view from `store` and saves it after every
    /// cycle.
    pub fn with_store(reconciler: Reconciler<P>, store: StateStore) -> StateResult<Self> {
        let spec = reconciler.spec();
        let view = match store.get_cluster(&spec.cluster_name)? {
            Some(record) => {
                let nodes = store.list_nodes(&spec.cluster_name)?;
                info!(
                    cluster = %spec.cluster_name,
                    nodes = nodes.len(),
                    cycles = record.cycles,
                    "restored cluster view"
                );
                ClusterView::restore(record, nodes, spec.settings.alert_after_failures)
            }
            None => reconciler.new_view(),
        };
        Ok(Self {
            reconciler: Arc::new(reconciler),
            view: Arc::new(Mutex::new(view)),
            store: Some(store),
        })
    }

    pub fn reconciler(&self) -> &Arc<Reconciler<P>> {
        &self.reconciler
    }

    pub fn view(&self) -> Arc<Mutex<ClusterView>> {
        Arc::clone(&self.view)
    }

    /// Run one cycle now, waiting for any cycle in flight.
    pub async fn reconcile_once(&self) -> CycleReport {
        self.reconcile_at(epoch_secs()).await
    }

    /// Run one cycle at an explicit clock value.
    pub async fn reconcile_at(&self, now: EpochSecs) -> CycleReport {
        let mut view = self.view.lock().await;
        run_cycle(&self.reconciler, &mut view, self.store.as_ref(), now).await
    }

    /// Run one cycle unless another is in progress.
    pub async fn try_reconcile(&self) -> CycleOutcome {
        self.try_reconcile_at(epoch_secs()).await
    }

    pub async fn try_reconcile_at(&self, now: EpochSecs) -> CycleOutcome {
        match self.view.try_lock() {
            Ok(mut view) => CycleOutcome::Completed(
                run_cycle(&self.reconciler, &mut view, self.store.as_ref(), now).await,
            ),
            Err(_) => {
                debug!("reconcile cycle already in progress, skipping");
                CycleOutcome::Skipped
            }
        }
    }

    /// Run cycles every `interval` until `shutdown` changes. A cycle in
    /// flight at shutdown is allowed to finish.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            cluster = %self.reconciler.spec().cluster_name,
            interval_secs = interval.as_secs_f64(),
            "reconcile loop started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                        warn!("previous reconcile cycle still running, skipping tick");
                        continue;
                    }
                    if let Some(done) = in_flight.take()
                        && let Err(e) = done.await
                    {
                        error!(error = %e, "reconcile cycle aborted");
                    }

                    let reconciler = Arc::clone(&self.reconciler);
                    let view = Arc::clone(&self.view);
                    let store = self.store.clone();
                    in_flight = Some(tokio::spawn(async move {
                        let mut view = view.lock().await;
                        run_cycle(&reconciler, &mut view, store.as_ref(), epoch_secs()).await;
                    }));
                }
                _ = shutdown.changed() => {
                    info!("reconcile loop shutting down");
                    if let Some(handle) = in_flight.take()
                        && let Err(e) = handle.await
                    {
                        error!(error = %e, "reconcile cycle aborted during shutdown");
                    }
                    break;
                }
            }
        }
    }
}

async fn run_cycle<P: ProviderClient + 'static>(
    reconciler: &Reconciler<P>,
    view: &mut ClusterView,
    store: Option<&StateStore>,
    now: EpochSecs,
) -> CycleReport {
    let report = reconciler.reconcile(view, now).await;

    if let Some(store) = store {
        let nodes: Vec<NodeRecord> = view.nodes().cloned().collect();
        if let Err(e) = store.save_cluster(&view.to_record(now), &nodes) {
            warn!(error = %e, "failed to persist cluster view");
        }
    }

    let acted = report.head_launched.is_some()
        || !report.launched.is_empty()
        || !report.terminating.is_empty();
    if acted || !report.errors.is_empty() {
        info!(
            cluster = %view.cluster_name(),
            target = report.target.map(|d| d.target),
            live_workers = report.live_workers,
            launched = report.launched.len(),
            terminating = report.terminating.len(),
            errors = report.errors.len(),
            "reconcile cycle complete"
        );
    } else {
        debug!(
            cluster = %view.cluster_name(),
            live_workers = report.live_workers,
            busy_fraction = report.busy_fraction,
            "reconcile cycle complete, no changes"
        );
    }
    report
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
