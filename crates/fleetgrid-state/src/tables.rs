//! redb table definitions.

use redb::TableDefinition;

/// Cluster bookkeeping keyed by cluster name.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Node records keyed by `{cluster}:{node_id}`, so one cluster is a contiguous range.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
