//! The reconciler's in-memory view of one cluster.
//!
//! A `ClusterView` is a single owned aggregate passed `&mut` into every
//! reconciliation cycle. Nothing else mutates it.

use std::collections::{BTreeMap, HashMap};

use fleet_core::{EpochSecs, NodeId, NodeRecord, NodeRole, NodeState};
use fleetgrid_state::ClusterRecord;

use crate::escalation::{Alert, FailureTracker};

#[derive(Debug)]
pub struct ClusterView {
    pub(crate) cluster_name: String,
    pub(crate) nodes: BTreeMap<NodeId, NodeRecord>,
    pub(crate) last_worker_count: Option<u32>,
    pub(crate) last_target: Option<u32>,
    /// The aggressive pre-start reached `initial_workers`.
    pub(crate) bootstrapped: bool,
    pub(crate) cycles: u64,
    pub(crate) failures: FailureTracker,
    /// Last status tag successfully applied to each node.
    pub(crate) status_tags: HashMap<NodeId, NodeState>,
}

impl ClusterView {
    /// An empty view for a cluster that has never been reconciled.
    pub fn new(cluster_name: &str, alert_after_failures: u32) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            nodes: BTreeMap::new(),
            last_worker_count: None,
            last_target: None,
            bootstrapped: false,
            cycles: 0,
            failures: FailureTracker::new(alert_after_failures),
            status_tags: HashMap::new(),
        }
    }

    /// Rebuild a view from persisted state.
    pub fn restore(record: ClusterRecord, nodes: Vec<NodeRecord>, alert_after_failures: u32) -> Self {
        let status_tags = nodes.iter().map(|n| (n.id.clone(), n.state)).collect();
        Self {
            cluster_name: record.cluster_name,
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            last_worker_count: record.last_worker_count,
            last_target: record.last_target,
            bootstrapped: record.bootstrapped,
            cycles: record.cycles,
            failures: FailureTracker::new(alert_after_failures),
            status_tags,
        }
    }

    /// Bookkeeping record for the state store.
    pub fn to_record(&self, now: EpochSecs) -> ClusterRecord {
        ClusterRecord {
            cluster_name: self.cluster_name.clone(),
            last_worker_count: self.last_worker_count,
            last_target: self.last_target,
            bootstrapped: self.bootstrapped,
            cycles: self.cycles,
            updated_at: now,
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes.get(id)
    }

    /// Live (pending, running, or idle) workers.
    pub fn live_workers(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes
            .values()
            .filter(|n| n.is_worker() && n.state.is_live())
    }

    pub fn live_worker_count(&self) -> u32 {
        self.live_workers().count() as u32
    }

    /// Live nodes of any role.
    pub fn live_nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values().filter(|n| n.state.is_live())
    }

    /// The live head node, if any.
    pub fn head(&self) -> Option<&NodeRecord> {
        self.nodes
            .values()
            .find(|n| n.role == NodeRole::Head && n.state.is_live())
    }

    /// True until the first observed cycle records a worker count.
    pub fn is_first_cycle(&self) -> bool {
        self.last_worker_count.is_none()
    }

    /// True until a cycle ends with at least `initial_workers` live workers
    /// while targeting them. Launch failures keep it set.
    pub fn bootstrap_pending(&self) -> bool {
        !self.bootstrapped
    }

    pub fn last_target(&self) -> Option<u32> {
        self.last_target
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Currently raised escalation alerts.
    pub fn alerts(&self) -> Vec<Alert> {
        self.failures.alerts()
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, role: NodeRole, state: NodeState) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            role,
            state,
            last_busy_at: 0,
            launched_at: 0,
            external: false,
        }
    }

    #[test]
    fn counts_only_live_workers() {
        let mut view = ClusterView::new("c", 3);
        for n in [
            node("h", NodeRole::Head, NodeState::Running),
            node("p", NodeRole::Worker, NodeState::Pending),
            node("r", NodeRole::Worker, NodeState::Running),
            node("i", NodeRole::Worker, NodeState::Idle),
            node("t", NodeRole::Worker, NodeState::Terminating),
        ] {
            view.nodes.insert(n.id.clone(), n);
        }
        assert_eq!(view.live_worker_count(), 3);
        assert_eq!(view.live_nodes().count(), 4);
        assert_eq!(view.head().unwrap().id, "h");
    }

    #[test]
    fn restore_round_trips_bookkeeping() {
        let mut view = ClusterView::new("c", 3);
        view.last_worker_count = Some(4);
        view.last_target = Some(5);
        view.bootstrapped = true;
        view.cycles = 9;
        let record = view.to_record(1234);
        assert_eq!(record.updated_at, 1234);

        let restored = ClusterView::restore(
            record,
            vec![node("w", NodeRole::Worker, NodeState::Idle)],
            3,
        );
        assert!(!restored.is_first_cycle());
        assert!(!restored.bootstrap_pending());
        assert_eq!(restored.cycles(), 9);
        assert_eq!(restored.last_target(), Some(5));
        assert_eq!(restored.status_tags.get("w"), Some(&NodeState::Idle));
    }

    #[test]
    fn new_view_is_first_cycle() {
        let view = ClusterView::new("c", 3);
        assert!(view.is_first_cycle());
        assert!(view.bootstrap_pending());
        assert!(view.head().is_none());
        assert!(view.alerts().is_empty());
    }
}
