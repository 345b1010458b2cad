//! Persisted bookkeeping types.

use fleet_core::{EpochSecs, NodeRecord};
use serde::{Deserialize, Serialize};

/// Per-cluster reconciler bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterRecord {
    pub cluster_name: String,
    /// Worker count recorded at the end of the last cycle. `None` until
    /// the first observed cycle completes.
    pub last_worker_count: Option<u32>,
    /// Target computed by the last cycle.
    pub last_target: Option<u32>,
    /// Set once the aggressive pre-start has reached `initial_workers`.
    #[serde(default)]
    pub bootstrapped: bool,
    /// Completed reconciliation cycles.
    pub cycles: u64,
    pub updated_at: EpochSecs,
}

/// Composite key for the nodes table. Neither part may contain `:`.
pub fn node_key(cluster: &str, node: &NodeRecord) -> String {
    format!("{cluster}:{}", node.id)
}

/// Range start for a cluster's node keys.
pub(crate) fn node_prefix(cluster: &str) -> String {
    format!("{cluster}:")
}

/// The node id in `key` if the key belongs to exactly `cluster`.
pub(crate) fn node_id_in<'k>(key: &'k str, cluster: &str) -> Option<&'k str> {
    key.strip_prefix(cluster)?
        .strip_prefix(':')
        .filter(|id| !id.is_empty() && !id.contains(':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_keys_belong_to_one_cluster() {
        assert_eq!(node_id_in("prod:i-1", "prod"), Some("i-1"));
        assert_eq!(node_id_in("prod:eu:i-9", "prod"), None);
        assert_eq!(node_id_in("production:i-1", "prod"), None);
        assert_eq!(node_id_in("prod:", "prod"), None);
    }
}
