//! Domain types shared across FleetGrid crates.
//!
//! These types describe the nodes of a cluster as the autoscaler sees
//! them. All types are serializable so the state store can persist them
//! as JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Provider-assigned identifier of a compute instance.
pub type NodeId = String;

/// Unix timestamp in seconds.
pub type EpochSecs = u64;

// ── Roles and states ──────────────────────────────────────────────

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// The singleton coordinator node. Never scaled, never terminated.
    Head,
    /// A replicable worker node.
    Worker,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Head => "head",
            NodeRole::Worker => "worker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "head" => Some(NodeRole::Head),
            "worker" => Some(NodeRole::Worker),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a node in the autoscaler's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Launch accepted, not yet confirmed running by the provider.
    Pending,
    /// Running and recently busy.
    Running,
    /// Running but without reported load for longer than the idle timeout.
    Idle,
    /// Selected for removal; a terminate call has been issued.
    Terminating,
    /// Confirmed gone by the provider.
    Terminated,
}

impl NodeState {
    /// Whether the node counts toward the live worker count.
    pub fn is_live(&self) -> bool {
        matches!(self, NodeState::Pending | NodeState::Running | NodeState::Idle)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Pending => "pending",
            NodeState::Running => "running",
            NodeState::Idle => "idle",
            NodeState::Terminating => "terminating",
            NodeState::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scaling policy applied when computing the target worker count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoscalingMode {
    /// Damped scale-down, rate-limited scale-up.
    #[default]
    Conservative,
    /// Pre-start `initial_workers`, no damping.
    Aggressive,
}

// ── Node records ──────────────────────────────────────────────────

/// One live cloud instance as tracked by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub role: NodeRole,
    pub state: NodeState,
    /// Last time the workload runtime reported this node busy.
    pub last_busy_at: EpochSecs,
    /// When the provider launched the node.
    pub launched_at: EpochSecs,
    /// Set when the node was found running without having been launched
    /// by this autoscaler.
    #[serde(default)]
    pub external: bool,
}

impl NodeRecord {
    /// A freshly launched node. Its idle clock starts at launch time.
    pub fn launched(id: NodeId, role: NodeRole, now: EpochSecs) -> Self {
        Self {
            id,
            role,
            state: NodeState::Pending,
            last_busy_at: now,
            launched_at: now,
            external: false,
        }
    }

    /// Seconds since the node was last busy.
    pub fn idle_secs(&self, now: EpochSecs) -> u64 {
        now.saturating_sub(self.last_busy_at)
    }

    pub fn is_worker(&self) -> bool {
        self.role == NodeRole::Worker
    }
}

/// A single load sample reported for a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    /// Fraction of the node's resources in use (0.0 – 1.0).
    pub load: f64,
    /// When the sample was taken.
    pub reported_at: EpochSecs,
}

impl LoadSample {
    pub fn is_busy(&self) -> bool {
        self.load > 0.0
    }
}

/// Per-cycle view of cluster demand. Produced and consumed within one
/// reconciliation cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DemandSnapshot {
    /// Busy nodes / live nodes; 0.0 for an empty cluster.
    pub busy_fraction: f64,
    pub busy_nodes: u32,
    pub total_nodes: u32,
    /// Raw samples for the nodes that reported one.
    pub samples: BTreeMap<NodeId, LoadSample>,
}

/// Tags applied to every node the autoscaler manages.
pub mod tags {
    /// Cluster membership tag. Its value is the cluster name.
    pub const CLUSTER: &str = "fleetgrid-cluster-name";
    /// Node role tag: `head` or `worker`.
    pub const ROLE: &str = "fleetgrid-node-role";
    /// Lifecycle status tag, refreshed on state changes.
    pub const STATUS: &str = "fleetgrid-node-status";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_states() {
        assert!(NodeState::Pending.is_live());
        assert!(NodeState::Running.is_live());
        assert!(NodeState::Idle.is_live());
        assert!(!NodeState::Terminating.is_live());
        assert!(!NodeState::Terminated.is_live());
    }

    #[test]
    fn launched_record_starts_pending() {
        let rec = NodeRecord::launched("i-1".into(), NodeRole::Worker, 500);
        assert_eq!(rec.state, NodeState::Pending);
        assert_eq!(rec.last_busy_at, 500);
        assert_eq!(rec.idle_secs(560), 60);
        assert_eq!(rec.idle_secs(100), 0);
    }

    #[test]
    fn role_round_trips_through_tag_value() {
        assert_eq!(NodeRole::parse(NodeRole::Head.as_str()), Some(NodeRole::Head));
        assert_eq!(NodeRole::parse("gpu"), None);
    }

    #[test]
    fn mode_serializes_snake_case() {
        let json = serde_json::to_string(&AutoscalingMode::Aggressive).unwrap();
        assert_eq!(json, "\"aggressive\"");
    }
}
