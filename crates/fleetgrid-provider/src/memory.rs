//! In-memory provider — a simulated cloud.
//!
//! Launched instances come up `Pending` and report `Running` from the
//! second `list_nodes` call on, which mimics one reconcile interval of
//! boot time. Terminated instances are reported once as `Terminated` and
//! then forgotten.
//!
//! Fault injection hooks let tests reproduce quota failures, partial
//! launches, per-id terminate failures, spot reclamation, and slow calls.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use fleet_core::{EpochSecs, NodeId, NodeRole, NodeTypeSpec, tags};
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::{
    ProviderAction, ProviderClient, ProviderNode, ProviderNodeState, TerminateReport, launch_tags,
};
use crate::error::{ProviderError, ProviderResult};

#[derive(Debug, Clone)]
struct SimNode {
    node: ProviderNode,
    /// Number of listings this node has appeared in.
    seen: u32,
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<NodeId, SimNode>,
    next_id: u64,
    fail_next_launch: Option<String>,
    partial_next_launch: Option<u32>,
    failing_terminates: BTreeSet<NodeId>,
    stall: Option<Duration>,
    calls: HashMap<ProviderAction, u32>,
    terminate_batches: Vec<Vec<NodeId>>,
    launch_requests: Vec<u32>,
}

/// Deterministic in-memory cloud.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Fault injection ────────────────────────────────────────────

    /// Make the next launch fail with a quota-style error.
    pub async fn fail_next_launch(&self, reason: &str) {
        self.inner.lock().await.fail_next_launch = Some(reason.to_string());
    }

    /// Make the next launch start only `n` instances.
    pub async fn partial_next_launch(&self, n: u32) {
        self.inner.lock().await.partial_next_launch = Some(n);
    }

    /// Make every terminate of `id` fail until cleared.
    pub async fn fail_terminate(&self, id: &str) {
        self.inner.lock().await.failing_terminates.insert(id.to_string());
    }

    pub async fn clear_terminate_failures(&self) {
        self.inner.lock().await.failing_terminates.clear();
    }

    /// Delay every call's reply by `delay`. The call still takes effect
    /// before the delay, so a caller that times out sees an unknown outcome.
    pub async fn stall(&self, delay: Option<Duration>) {
        self.inner.lock().await.stall = delay;
    }

    /// Reclaim an instance out from under the autoscaler (spot reclamation).
    pub async fn reclaim(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.nodes.get_mut(id) {
            Some(sim) => {
                sim.node.state = ProviderNodeState::Terminated;
                true
            }
            None => false,
        }
    }

    /// Add an instance that was launched outside the autoscaler.
    pub async fn insert_node(
        &self,
        id: &str,
        cluster_tag: &str,
        role: NodeRole,
        state: ProviderNodeState,
        launched_at: EpochSecs,
    ) {
        let mut node_tags = BTreeMap::new();
        node_tags.insert(tags::CLUSTER.to_string(), cluster_tag.to_string());
        node_tags.insert(tags::ROLE.to_string(), role.as_str().to_string());
        let mut inner = self.inner.lock().await;
        inner.nodes.insert(
            id.to_string(),
            SimNode {
                node: ProviderNode {
                    id: id.to_string(),
                    state,
                    launched_at,
                    tags: node_tags,
                },
                seen: 1,
            },
        );
    }

    // ── Inspection ─────────────────────────────────────────────────

    /// Number of calls made for `action`.
    pub async fn calls(&self, action: ProviderAction) -> u32 {
        self.inner.lock().await.calls.get(&action).copied().unwrap_or(0)
    }

    /// Every terminate batch received, in order.
    pub async fn terminate_batches(&self) -> Vec<Vec<NodeId>> {
        self.inner.lock().await.terminate_batches.clone()
    }

    /// Requested count of every launch call, in order.
    pub async fn launch_requests(&self) -> Vec<u32> {
        self.inner.lock().await.launch_requests.clone()
    }

    /// Ids of instances not yet terminated, with their role.
    pub async fn live_nodes(&self) -> Vec<(NodeId, Option<NodeRole>)> {
        let inner = self.inner.lock().await;
        inner
            .nodes
            .values()
            .filter(|sim| sim.node.state != ProviderNodeState::Terminated)
            .map(|sim| (sim.node.id.clone(), sim.node.role()))
            .collect()
    }

    pub async fn node_tags(&self, id: &str) -> Option<BTreeMap<String, String>> {
        let inner = self.inner.lock().await;
        inner.nodes.get(id).map(|sim| sim.node.tags.clone())
    }

    async fn delay(&self) {
        let stall = self.inner.lock().await.stall;
        if let Some(d) = stall {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl ProviderClient for InMemoryProvider {
    async fn list_nodes(&self, cluster_tag: &str) -> ProviderResult<Vec<ProviderNode>> {
        let listed = {
            let mut inner = self.inner.lock().await;
            *inner.calls.entry(ProviderAction::Describe).or_default() += 1;

            let mut listed = Vec::new();
            for sim in inner.nodes.values_mut() {
                if sim.node.tags.get(tags::CLUSTER).map(String::as_str) != Some(cluster_tag) {
                    continue;
                }
                if sim.node.state == ProviderNodeState::Pending && sim.seen > 0 {
                    sim.node.state = ProviderNodeState::Running;
                }
                if sim.node.state == ProviderNodeState::ShuttingDown {
                    sim.node.state = ProviderNodeState::Terminated;
                }
                sim.seen += 1;
                listed.push(sim.node.clone());
            }
            inner.nodes.retain(|_, sim| {
                sim.node.state != ProviderNodeState::Terminated
                    || sim.node.tags.get(tags::CLUSTER).map(String::as_str) != Some(cluster_tag)
            });
            listed
        };
        self.delay().await;
        Ok(listed)
    }

    async fn launch(
        &self,
        cluster_tag: &str,
        node_type: &NodeTypeSpec,
        count: u32,
    ) -> ProviderResult<Vec<NodeId>> {
        let result = {
            let mut inner = self.inner.lock().await;
            *inner.calls.entry(ProviderAction::Launch).or_default() += 1;
            inner.launch_requests.push(count);

            if let Some(reason) = inner.fail_next_launch.take() {
                Err(ProviderError::Provision {
                    action: ProviderAction::Launch,
                    reason,
                })
            } else {
                let granted = inner
                    .partial_next_launch
                    .take()
                    .map_or(count, |n| n.min(count));
                let now = epoch_secs();
                let node_tags = launch_tags(cluster_tag, node_type);
                let mut ids = Vec::with_capacity(granted as usize);
                for _ in 0..granted {
                    inner.next_id += 1;
                    let id = format!("i-{:08x}", inner.next_id);
                    inner.nodes.insert(
                        id.clone(),
                        SimNode {
                            node: ProviderNode {
                                id: id.clone(),
                                state: ProviderNodeState::Pending,
                                launched_at: now,
                                tags: node_tags.clone(),
                            },
                            seen: 0,
                        },
                    );
                    ids.push(id);
                }
                debug!(
                    role = %node_type.role,
                    instance_type = %node_type.instance_type,
                    requested = count,
                    launched = granted,
                    "simulated launch"
                );
                if granted < count {
                    Err(ProviderError::PartialLaunch {
                        launched: ids,
                        requested: count,
                        reason: "InsufficientInstanceCapacity".to_string(),
                    })
                } else {
                    Ok(ids)
                }
            }
        };
        self.delay().await;
        result
    }

    async fn terminate(&self, ids: &[NodeId]) -> ProviderResult<TerminateReport> {
        let report = {
            let mut inner = self.inner.lock().await;
            *inner.calls.entry(ProviderAction::Terminate).or_default() += 1;
            inner.terminate_batches.push(ids.to_vec());

            let mut report = TerminateReport::default();
            for id in ids {
                if inner.failing_terminates.contains(id) {
                    report
                        .failed
                        .push((id.clone(), "IncorrectInstanceState".to_string()));
                    continue;
                }
                match inner.nodes.get_mut(id) {
                    Some(sim) => {
                        sim.node.state = ProviderNodeState::ShuttingDown;
                        report.terminated.push(id.clone());
                    }
                    None => report
                        .failed
                        .push((id.clone(), "InvalidInstanceID.NotFound".to_string())),
                }
            }
            report
        };
        self.delay().await;
        Ok(report)
    }

    async fn tag(&self, id: &str, new_tags: &BTreeMap<String, String>) -> ProviderResult<()> {
        let result = {
            let mut inner = self.inner.lock().await;
            *inner.calls.entry(ProviderAction::Tag).or_default() += 1;
            match inner.nodes.get_mut(id) {
                Some(sim) => {
                    sim.node
                        .tags
                        .extend(new_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Ok(())
                }
                None => Err(ProviderError::Provision {
                    action: ProviderAction::Tag,
                    reason: format!("instance {id} not found"),
                }),
            }
        };
        self.delay().await;
        result
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
