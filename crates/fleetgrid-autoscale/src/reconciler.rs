//! Reconciler — one observe → compute → act pass over a cluster.
//!
//! The reconciler never assumes a command succeeded. Every cycle starts
//! from the provider's listing, and whatever the last cycle left half done
//! (timed-out launches, failed terminations) is corrected from there.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use fleet_core::{ClusterSpec, EpochSecs, NodeId, NodeRecord, NodeRole, NodeState, tags};
use fleetgrid_provider::{
    ProviderAction, ProviderClient, ProviderError, ProviderNode, ProviderNodeState, ProviderResult,
};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::estimator::{LoadBoard, ResourceDemandEstimator};
use crate::lifecycle::{NodeLifecycleTracker, Transition};
use crate::policy::{TargetDecision, TargetInputs, TargetReason, compute_target, launch_limit};
use crate::view::ClusterView;

/// What one cycle saw and did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// False when the provider listing failed and the cycle stopped early.
    pub observed: bool,
    pub busy_fraction: f64,
    pub target: Option<TargetDecision>,
    /// Live workers after the cycle's commands were issued.
    pub live_workers: u32,
    pub head_launched: Option<NodeId>,
    pub launched: Vec<NodeId>,
    pub terminating: Vec<NodeId>,
    /// Nodes found running that this view did not know about.
    pub adopted: Vec<NodeId>,
    /// Nodes the provider confirmed gone.
    pub removed: Vec<NodeId>,
    /// Running/idle changes made by the lifecycle tracker.
    pub transitions: Vec<Transition>,
    pub tagged: u32,
    pub errors: Vec<ProviderError>,
}

/// Drives one cluster toward its target worker count.
pub struct Reconciler<P> {
    spec: ClusterSpec,
    provider: Arc<P>,
    loads: LoadBoard,
    lifecycle: NodeLifecycleTracker,
    estimator: ResourceDemandEstimator,
}

impl<P: ProviderClient + 'static> Reconciler<P> {
    pub fn new(spec: ClusterSpec, provider: Arc<P>) -> Self {
        let lifecycle = NodeLifecycleTracker::new(spec.idle_timeout);
        let estimator = ResourceDemandEstimator::new(spec.idle_timeout);
        Self {
            spec,
            provider,
            loads: LoadBoard::new(),
            lifecycle,
            estimator,
        }
    }

    /// Share an existing load board with the workload runtime.
    pub fn with_load_board(mut self, loads: LoadBoard) -> Self {
        self.loads = loads;
        self
    }

    pub fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    pub fn loads(&self) -> &LoadBoard {
        &self.loads
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// An empty view for this reconciler's cluster.
    pub fn new_view(&self) -> ClusterView {
        ClusterView::new(
            &self.spec.cluster_name,
            self.spec.settings.alert_after_failures,
        )
    }

    /// Run one reconciliation cycle at time `now`.
    pub async fn reconcile(&self, view: &mut ClusterView, now: EpochSecs) -> CycleReport {
        let mut report = CycleReport::default();
        let cluster = self.spec.cluster_tag();

        // ── Observe ────────────────────────────────────────────────
        let listing = self
            .call(ProviderAction::Describe, self.provider.list_nodes(cluster))
            .await;
        let listed = match listing {
            Ok(nodes) => {
                view.failures.record_success(ProviderAction::Describe);
                nodes
            }
            Err(e) => {
                self.record_error(view, &mut report, e, now);
                return report;
            }
        };
        report.observed = true;
        let retry_terminate = self.observe(view, listed, now, &mut report);
        self.loads
            .retain_known(|id| view.nodes.contains_key(id))
            .await;

        let samples = self.loads.snapshot().await;
        self.lifecycle.record_load(&mut view.nodes, &samples);
        report.transitions = self.lifecycle.refresh(&mut view.nodes, now);
        let demand = self.estimator.estimate(view.live_nodes(), &samples, now);
        report.busy_fraction = demand.busy_fraction;

        if view.head().is_none() {
            self.launch_head(view, now, &mut report).await;
        }

        // ── Compute target ─────────────────────────────────────────
        let live = view.live_worker_count();
        let decision = compute_target(
            &self.spec,
            TargetInputs {
                live_workers: live,
                busy_fraction: demand.busy_fraction,
                idle_eligible: self.lifecycle.eligible_count(view.live_workers(), now),
                bootstrap_pending: view.bootstrap_pending(),
            },
        );
        report.target = Some(decision);
        if decision.target != live {
            info!(
                %cluster,
                live,
                target = decision.target,
                unclamped = decision.unclamped,
                reason = ?decision.reason,
                busy_fraction = demand.busy_fraction,
                "worker target differs from live count"
            );
        } else {
            debug!(%cluster, live, busy_fraction = demand.busy_fraction, "worker count on target");
        }

        // ── Act ────────────────────────────────────────────────────
        if decision.target > live {
            self.scale_up(view, decision.target - live, live, now, &mut report)
                .await;
        }

        let mut batch = Vec::new();
        if decision.target < live {
            let excess = live - decision.target;
            let forced = live.saturating_sub(self.spec.max_workers);
            batch = self
                .lifecycle
                .select_for_termination(view.live_workers(), excess, forced, now);
            if (batch.len() as u32) < excess {
                debug!(
                    %cluster,
                    excess,
                    selected = batch.len(),
                    "holding workers that have not reached the idle timeout"
                );
            }
        }
        batch.extend(retry_terminate);
        if !batch.is_empty() {
            self.terminate(view, batch, now, &mut report).await;
        }

        self.sync_status_tags(view, now, &mut report).await;

        // ── Persist ────────────────────────────────────────────────
        report.live_workers = view.live_worker_count();
        if decision.reason != TargetReason::Bootstrap || report.live_workers >= decision.target {
            view.bootstrapped = true;
        } else {
            info!(
                %cluster,
                live = report.live_workers,
                initial_workers = decision.target,
                "pre-start incomplete, retrying next cycle"
            );
        }
        view.last_worker_count = Some(report.live_workers);
        view.last_target = Some(decision.target);
        view.cycles += 1;
        report
    }

    /// Fold the provider's listing into the view. Returns workers that are
    /// still running although a terminate was already issued for them.
    fn observe(
        &self,
        view: &mut ClusterView,
        listed: Vec<ProviderNode>,
        now: EpochSecs,
        report: &mut CycleReport,
    ) -> Vec<NodeId> {
        let mut seen = HashSet::with_capacity(listed.len());
        let mut retry = Vec::new();

        for node in listed {
            seen.insert(node.id.clone());
            let known = view.nodes.get(&node.id).map(|n| (n.state, n.role));

            match (known, node.state) {
                (Some(_), ProviderNodeState::Terminated) => {
                    view.nodes.remove(&node.id);
                    debug!(node_id = %node.id, "termination confirmed");
                    report.removed.push(node.id);
                }
                (Some(_), ProviderNodeState::ShuttingDown) => {
                    self.set_state(view, &node.id, NodeState::Terminating);
                }
                (Some((NodeState::Terminating, NodeRole::Worker)), _) => {
                    retry.push(node.id);
                }
                (Some((NodeState::Pending, _)), ProviderNodeState::Running) => {
                    info!(node_id = %node.id, "node confirmed running");
                    self.set_state(view, &node.id, NodeState::Running);
                }
                (Some((state, _)), ProviderNodeState::Pending) if state != NodeState::Pending => {
                    self.set_state(view, &node.id, NodeState::Pending);
                }
                (Some(_), _) => {}
                (None, ProviderNodeState::Terminated | ProviderNodeState::ShuttingDown) => {}
                (None, state) => self.adopt(view, node, state, now, report),
            }
        }

        let vanished: Vec<NodeId> = view
            .nodes
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in vanished {
            if let Some(node) = view.nodes.remove(&id) {
                info!(node_id = %id, role = %node.role, state = %node.state, "node no longer listed by provider");
            }
            report.removed.push(id);
        }

        retry
    }

    fn adopt(
        &self,
        view: &mut ClusterView,
        node: ProviderNode,
        state: ProviderNodeState,
        now: EpochSecs,
        report: &mut CycleReport,
    ) {
        let Some(role) = node.role() else {
            debug!(node_id = %node.id, "ignoring cluster node without a role tag");
            return;
        };
        if role == NodeRole::Head
            && let Some(head) = view.head()
        {
            warn!(existing = %head.id, extra = %node.id, "more than one head node listed");
        }
        let state = if state == ProviderNodeState::Pending {
            NodeState::Pending
        } else {
            NodeState::Running
        };
        info!(node_id = %node.id, %role, %state, "adopting externally launched node");
        report.adopted.push(node.id.clone());
        view.nodes.insert(
            node.id.clone(),
            NodeRecord {
                id: node.id,
                role,
                state,
                last_busy_at: now,
                launched_at: node.launched_at,
                external: true,
            },
        );
    }

    async fn launch_head(&self, view: &mut ClusterView, now: EpochSecs, report: &mut CycleReport) {
        info!(cluster = %self.spec.cluster_tag(), "no live head node, launching one");
        let result = self
            .call(
                ProviderAction::Launch,
                self.provider.launch(self.spec.cluster_tag(), &self.spec.head, 1),
            )
            .await;
        let ids = self.absorb_launch(view, NodeRole::Head, result, now, report);
        report.head_launched = ids.into_iter().next();
    }

    async fn scale_up(
        &self,
        view: &mut ClusterView,
        wanted: u32,
        live: u32,
        now: EpochSecs,
        report: &mut CycleReport,
    ) {
        let count = match launch_limit(&self.spec, live) {
            Some(limit) if limit < wanted => {
                debug!(wanted, limit, "launch batch limited by upscaling speed");
                limit
            }
            _ => wanted,
        };
        info!(cluster = %self.spec.cluster_tag(), count, "launching workers");
        let result = self
            .call(
                ProviderAction::Launch,
                self.provider
                    .launch(self.spec.cluster_tag(), &self.spec.worker, count),
            )
            .await;
        let ids = self.absorb_launch(view, NodeRole::Worker, result, now, report);
        report.launched.extend(ids);
    }

    /// Record whatever a launch call produced. Partial launches still add
    /// the ids that came up; timeouts add nothing and leave the next
    /// listing to adopt anything that did launch.
    fn absorb_launch(
        &self,
        view: &mut ClusterView,
        role: NodeRole,
        result: ProviderResult<Vec<NodeId>>,
        now: EpochSecs,
        report: &mut CycleReport,
    ) -> Vec<NodeId> {
        let ids = match result {
            Ok(ids) => {
                view.failures.record_success(ProviderAction::Launch);
                ids
            }
            Err(e) => {
                let ids = match &e {
                    ProviderError::PartialLaunch { launched, .. } => launched.clone(),
                    _ => Vec::new(),
                };
                self.record_error(view, report, e, now);
                ids
            }
        };
        for id in &ids {
            view.nodes
                .insert(id.clone(), NodeRecord::launched(id.clone(), role, now));
        }
        ids
    }

    async fn terminate(
        &self,
        view: &mut ClusterView,
        mut batch: Vec<NodeId>,
        now: EpochSecs,
        report: &mut CycleReport,
    ) {
        batch.retain(|id| view.nodes.get(id).is_some_and(NodeRecord::is_worker));
        if batch.is_empty() {
            return;
        }

        let mut prior = HashMap::with_capacity(batch.len());
        for id in &batch {
            if let Some(node) = view.nodes.get_mut(id) {
                prior.insert(id.clone(), node.state);
                node.state = NodeState::Terminating;
            }
        }

        info!(cluster = %self.spec.cluster_tag(), count = batch.len(), "terminating workers");
        let result = self
            .call(ProviderAction::Terminate, self.provider.terminate(&batch))
            .await;
        match result {
            Ok(outcome) => {
                for (id, reason) in &outcome.failed {
                    warn!(node_id = %id, %reason, "terminate failed, will retry next cycle");
                    revert(view, id, &prior);
                }
                if outcome.failed.is_empty() {
                    view.failures.record_success(ProviderAction::Terminate);
                } else {
                    let err = ProviderError::Provision {
                        action: ProviderAction::Terminate,
                        reason: format!(
                            "{} of {} instances failed to terminate",
                            outcome.failed.len(),
                            batch.len()
                        ),
                    };
                    self.record_error(view, report, err, now);
                }
                report.terminating.extend(outcome.terminated);
            }
            Err(e) if e.outcome_unknown() => {
                report.terminating.extend(batch);
                self.record_error(view, report, e, now);
            }
            Err(e) => {
                for id in &batch {
                    revert(view, id, &prior);
                }
                self.record_error(view, report, e, now);
            }
        }
    }

    /// Tag every node whose lifecycle state differs from its last applied
    /// status tag. Calls for different nodes run in parallel.
    async fn sync_status_tags(
        &self,
        view: &mut ClusterView,
        now: EpochSecs,
        report: &mut CycleReport,
    ) {
        let nodes = &view.nodes;
        view.status_tags.retain(|id, _| nodes.contains_key(id));

        let stale: Vec<(NodeId, NodeState)> = view
            .nodes
            .values()
            .filter(|n| view.status_tags.get(&n.id) != Some(&n.state))
            .map(|n| (n.id.clone(), n.state))
            .collect();
        if stale.is_empty() {
            return;
        }

        let timeout = self.spec.settings.provider_timeout;
        let mut calls = JoinSet::new();
        for (id, state) in stale {
            let provider = Arc::clone(&self.provider);
            calls.spawn(async move {
                let mut labels = BTreeMap::new();
                labels.insert(tags::STATUS.to_string(), state.as_str().to_string());
                let result = match tokio::time::timeout(timeout, provider.tag(&id, &labels)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout {
                        action: ProviderAction::Tag,
                        elapsed: timeout,
                    }),
                };
                (id, state, result)
            });
        }

        let mut last_failure = None;
        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((id, state, Ok(()))) => {
                    view.status_tags.insert(id, state);
                    report.tagged += 1;
                }
                Ok((id, _, Err(e))) => {
                    debug!(node_id = %id, error = %e, "status tag failed");
                    last_failure = Some(e);
                }
                Err(e) => warn!(error = %e, "tag task did not complete"),
            }
        }
        match last_failure {
            Some(e) => self.record_error(view, report, e, now),
            None => view.failures.record_success(ProviderAction::Tag),
        }
    }

    fn set_state(&self, view: &mut ClusterView, id: &str, state: NodeState) {
        if let Some(node) = view.nodes.get_mut(id)
            && node.state != state
        {
            debug!(node_id = %id, from = %node.state, to = %state, "provider state applied");
            node.state = state;
        }
    }

    fn record_error(
        &self,
        view: &mut ClusterView,
        report: &mut CycleReport,
        err: ProviderError,
        now: EpochSecs,
    ) {
        let action = err.action();
        if err.is_permission() {
            error!(%action, error = %err, "provider action not permitted");
        } else if err.outcome_unknown() {
            warn!(%action, error = %err, "provider call outcome unknown, next observation decides");
        } else {
            warn!(%action, error = %err, "provider call failed, will retry next cycle");
        }
        view.failures.record_failure(action, &err.to_string(), now);
        report.errors.push(err);
    }

    async fn call<T>(
        &self,
        action: ProviderAction,
        fut: impl Future<Output = ProviderResult<T>>,
    ) -> ProviderResult<T> {
        let timeout = self.spec.settings.provider_timeout;
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                action,
                elapsed: timeout,
            }),
        }
    }
}

/// Undo a `Terminating` mark after a failed terminate.
fn revert(view: &mut ClusterView, id: &str, prior: &HashMap<NodeId, NodeState>) {
    if let Some(node) = view.nodes.get_mut(id) {
        node.state = match prior.get(id) {
            Some(NodeState::Terminating) | None => NodeState::Running,
            Some(state) => *state,
        };
    }
}
