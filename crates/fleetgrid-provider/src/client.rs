//! The `ProviderClient` trait and the records it exchanges.

use std::collections::BTreeMap;

use async_trait::async_trait;
use fleet_core::{EpochSecs, NodeId, NodeRole, NodeTypeSpec, tags};
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;

/// The provider operations the autoscaler issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderAction {
    Describe,
    Launch,
    Terminate,
    Tag,
}

impl ProviderAction {
    pub const ALL: [ProviderAction; 4] = [
        ProviderAction::Describe,
        ProviderAction::Launch,
        ProviderAction::Terminate,
        ProviderAction::Tag,
    ];

    /// Access-policy action name this operation requires.
    pub fn iam_action(&self) -> &'static str {
        match self {
            ProviderAction::Describe => "ec2:DescribeInstances",
            ProviderAction::Launch => "ec2:RunInstances",
            ProviderAction::Terminate => "ec2:TerminateInstances",
            ProviderAction::Tag => "ec2:CreateTags",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderAction::Describe => "describe",
            ProviderAction::Launch => "launch",
            ProviderAction::Terminate => "terminate",
            ProviderAction::Tag => "tag",
        }
    }
}

impl std::fmt::Display for ProviderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance state as the provider reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderNodeState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
}

/// One instance returned by `list_nodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderNode {
    pub id: NodeId,
    pub state: ProviderNodeState,
    pub launched_at: EpochSecs,
    pub tags: BTreeMap<String, String>,
}

impl ProviderNode {
    /// Role read from the role tag, if present and well-formed.
    pub fn role(&self) -> Option<NodeRole> {
        self.tags.get(tags::ROLE).and_then(|r| NodeRole::parse(r))
    }
}

/// Outcome of a best-effort terminate batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerminateReport {
    pub terminated: Vec<NodeId>,
    pub failed: Vec<(NodeId, String)>,
}

/// Thin abstraction over a cloud compute API.
///
/// Implementations must be safe to call concurrently for different node
/// ids. The reconciler never issues two mutating calls for the same id
/// at once.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// All instances carrying the cluster tag, in any state.
    async fn list_nodes(&self, cluster_tag: &str) -> ProviderResult<Vec<ProviderNode>>;

    /// Launch `count` instances of `node_type`, tagged with the cluster
    /// tag and the role. On partial failure the error carries the ids
    /// that did launch.
    async fn launch(
        &self,
        cluster_tag: &str,
        node_type: &NodeTypeSpec,
        count: u32,
    ) -> ProviderResult<Vec<NodeId>>;

    /// Terminate the given instances. Per-id failures do not stop the
    /// rest of the batch.
    async fn terminate(&self, ids: &[NodeId]) -> ProviderResult<TerminateReport>;

    /// Merge `tags` into the instance's tags.
    async fn tag(&self, id: &str, tags: &BTreeMap<String, String>) -> ProviderResult<()>;
}

/// Tags every launched node receives.
pub fn launch_tags(cluster_tag: &str, node_type: &NodeTypeSpec) -> BTreeMap<String, String> {
    let mut out = node_type.tags.clone();
    out.insert(tags::CLUSTER.to_string(), cluster_tag.to_string());
    out.insert(tags::ROLE.to_string(), node_type.role.as_str().to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iam_actions_are_ec2() {
        for action in ProviderAction::ALL {
            assert!(action.iam_action().starts_with("ec2:"));
        }
    }

    #[test]
    fn role_from_tags() {
        let mut node = ProviderNode {
            id: "i-1".into(),
            state: ProviderNodeState::Running,
            launched_at: 0,
            tags: BTreeMap::new(),
        };
        assert_eq!(node.role(), None);
        node.tags.insert(tags::ROLE.into(), "worker".into());
        assert_eq!(node.role(), Some(NodeRole::Worker));
        node.tags.insert(tags::ROLE.into(), "bogus".into());
        assert_eq!(node.role(), None);
    }
}
