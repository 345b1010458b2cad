//! StateStore — redb-backed persistence for the autoscaler.
//!
//! A cluster's node view is saved as a whole: `save_cluster` replaces every
//! node record for the cluster and its bookkeeping in one write
//! transaction, so a crash never leaves a half-written view behind.

use std::path::Path;
use std::sync::Arc;

use fleet_core::NodeRecord;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::{ClusterRecord, node_id_in, node_key, node_prefix};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Get a cluster's bookkeeping record.
    pub fn get_cluster(&self, cluster: &str) -> StateResult<Option<ClusterRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        match table.get(cluster).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: ClusterRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Replace a cluster's bookkeeping and full node view atomically.
    pub fn save_cluster(&self, record: &ClusterRecord, nodes: &[NodeRecord]) -> StateResult<()> {
        let cluster = record.cluster_name.as_str();
        let stale = self.node_keys(cluster)?;
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let encoded: Vec<(String, Vec<u8>)> = nodes
            .iter()
            .map(|n| {
                serde_json::to_vec(n)
                    .map(|v| (node_key(cluster, n), v))
                    .map_err(map_err!(Serialize))
            })
            .collect::<StateResult<_>>()?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            clusters
                .insert(cluster, value.as_slice())
                .map_err(map_err!(Write))?;

            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            for key in &stale {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            for (key, value) in &encoded {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%cluster, nodes = nodes.len(), cycles = record.cycles, "cluster state saved");
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// List the saved node records for a cluster.
    pub fn list_nodes(&self, cluster: &str) -> StateResult<Vec<NodeRecord>> {
        let prefix = node_prefix(cluster);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            if !key.starts_with(&prefix) {
                break;
            }
            if node_id_in(key, cluster).is_some() {
                let node: NodeRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(node);
            }
        }
        Ok(results)
    }

    /// Delete a cluster's bookkeeping and nodes. Returns true if it existed.
    pub fn delete_cluster(&self, cluster: &str) -> StateResult<bool> {
        let keys = self.node_keys(cluster)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut clusters = txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
            existed = clusters.remove(cluster).map_err(map_err!(Write))?.is_some();
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%cluster, existed, "cluster state deleted");
        Ok(existed)
    }

    fn node_keys(&self, cluster: &str) -> StateResult<Vec<String>> {
        let prefix = node_prefix(cluster);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            if !key.starts_with(&prefix) {
                break;
            }
            if node_id_in(key, cluster).is_some() {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{NodeRole, NodeState};

    fn test_node(id: &str, role: NodeRole) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            role,
            state: NodeState::Running,
            last_busy_at: 1000,
            launched_at: 900,
            external: false,
        }
    }

    fn test_record(cluster: &str, cycles: u64) -> ClusterRecord {
        ClusterRecord {
            cluster_name: cluster.to_string(),
            last_worker_count: Some(2),
            last_target: Some(3),
            bootstrapped: true,
            cycles,
            updated_at: 1000,
        }
    }

    #[test]
    fn save_and_load_cluster() {
        let store = StateStore::open_in_memory().unwrap();
        let nodes = vec![
            test_node("i-head", NodeRole::Head),
            test_node("i-1", NodeRole::Worker),
        ];
        store.save_cluster(&test_record("tally", 1), &nodes).unwrap();

        let record = store.get_cluster("tally").unwrap().unwrap();
        assert_eq!(record.last_worker_count, Some(2));
        let mut loaded = store.list_nodes("tally").unwrap();
        loaded.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "i-1");
    }

    #[test]
    fn save_replaces_previous_view() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .save_cluster(
                &test_record("tally", 1),
                &[test_node("i-1", NodeRole::Worker), test_node("i-2", NodeRole::Worker)],
            )
            .unwrap();
        store
            .save_cluster(&test_record("tally", 2), &[test_node("i-3", NodeRole::Worker)])
            .unwrap();

        let loaded = store.list_nodes("tally").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "i-3");
        assert_eq!(store.get_cluster("tally").unwrap().unwrap().cycles, 2);
    }

    #[test]
    fn clusters_are_isolated() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .save_cluster(&test_record("a", 1), &[test_node("i-1", NodeRole::Worker)])
            .unwrap();
        store
            .save_cluster(&test_record("b", 1), &[test_node("i-9", NodeRole::Worker)])
            .unwrap();

        assert!(store.delete_cluster("a").unwrap());
        assert!(store.list_nodes("a").unwrap().is_empty());
        assert_eq!(store.list_nodes("b").unwrap().len(), 1);
        assert!(!store.delete_cluster("a").unwrap());
    }

    #[test]
    fn cluster_names_sharing_a_prefix_do_not_collide() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .save_cluster(&test_record("prod:eu", 1), &[test_node("i-9", NodeRole::Worker)])
            .unwrap();
        store
            .save_cluster(&test_record("prod", 1), &[test_node("i-1", NodeRole::Worker)])
            .unwrap();

        let prod: Vec<_> = store.list_nodes("prod").unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(prod, vec!["i-1"]);
        let eu = store.list_nodes("prod:eu").unwrap();
        assert_eq!(eu.len(), 1);
        assert_eq!(eu[0].id, "i-9");

        store.save_cluster(&test_record("prod", 2), &[]).unwrap();
        assert!(store.delete_cluster("prod").unwrap());
        assert_eq!(store.list_nodes("prod:eu").unwrap().len(), 1);
    }

    #[test]
    fn records_without_bootstrap_flag_still_load() {
        let json = r#"{"cluster_name":"old","last_worker_count":null,"last_target":null,"cycles":0,"updated_at":0}"#;
        let record: ClusterRecord = serde_json::from_str(json).unwrap();
        assert!(!record.bootstrapped);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_cluster("none").unwrap().is_none());
        assert!(store.list_nodes("none").unwrap().is_empty());
        assert!(!store.delete_cluster("none").unwrap());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fleet.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .save_cluster(&test_record("tally", 7), &[test_node("i-1", NodeRole::Worker)])
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.get_cluster("tally").unwrap().unwrap().cycles, 7);
        assert_eq!(store.list_nodes("tally").unwrap().len(), 1);
    }
}
