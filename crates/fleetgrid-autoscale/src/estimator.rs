//! Resource demand estimation.
//!
//! The workload runtime pushes per-node load samples into a shared
//! [`LoadBoard`]. Once per cycle the [`ResourceDemandEstimator`] turns the
//! live node set plus those samples into a [`DemandSnapshot`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::{DemandSnapshot, EpochSecs, LoadSample, NodeId, NodeRecord};
use tokio::sync::RwLock;
use tracing::debug;

/// Latest load sample per node, shared between the workload runtime and
/// the reconciler.
#[derive(Debug, Clone, Default)]
pub struct LoadBoard {
    samples: Arc<RwLock<HashMap<NodeId, LoadSample>>>,
}

impl LoadBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a load sample for a node, replacing any older one.
    pub async fn report(&self, node_id: &str, load: f64, reported_at: EpochSecs) {
        let mut samples = self.samples.write().await;
        let sample = LoadSample {
            load: load.clamp(0.0, 1.0),
            reported_at,
        };
        match samples.get(node_id) {
            Some(existing) if existing.reported_at > reported_at => {}
            _ => {
                samples.insert(node_id.to_string(), sample);
            }
        }
    }

    /// Copy of the current samples.
    pub async fn snapshot(&self) -> HashMap<NodeId, LoadSample> {
        self.samples.read().await.clone()
    }

    /// Drop samples for nodes `known` rejects. Returns how many went.
    pub async fn retain_known(&self, known: impl Fn(&str) -> bool) -> usize {
        let mut samples = self.samples.write().await;
        let before = samples.len();
        samples.retain(|id, _| known(id));
        let dropped = before - samples.len();
        if dropped > 0 {
            debug!(dropped, "pruned load samples for unknown nodes");
        }
        dropped
    }
}

/// Computes the busy fraction of the live node set.
#[derive(Debug, Clone)]
pub struct ResourceDemandEstimator {
    /// Samples older than this are ignored.
    stale_after: Duration,
}

impl ResourceDemandEstimator {
    pub fn new(stale_after: Duration) -> Self {
        Self { stale_after }
    }

    /// Busy fraction over the given live nodes. An empty cluster is fully
    /// idle (0.0).
    pub fn estimate<'a>(
        &self,
        nodes: impl IntoIterator<Item = &'a NodeRecord>,
        samples: &HashMap<NodeId, LoadSample>,
        now: EpochSecs,
    ) -> DemandSnapshot {
        let mut snapshot = DemandSnapshot::default();
        for node in nodes {
            snapshot.total_nodes += 1;
            let Some(sample) = samples.get(&node.id) else {
                continue;
            };
            if now.saturating_sub(sample.reported_at) > self.stale_after.as_secs() {
                continue;
            }
            if sample.is_busy() {
                snapshot.busy_nodes += 1;
            }
            snapshot.samples.insert(node.id.clone(), *sample);
        }
        snapshot.busy_fraction = if snapshot.total_nodes == 0 {
            0.0
        } else {
            f64::from(snapshot.busy_nodes) / f64::from(snapshot.total_nodes)
        };
        debug!(
            busy = snapshot.busy_nodes,
            total = snapshot.total_nodes,
            busy_fraction = snapshot.busy_fraction,
            "demand estimated"
        );
        snapshot
    }
}
