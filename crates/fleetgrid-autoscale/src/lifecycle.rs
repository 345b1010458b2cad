//! Node lifecycle tracking — idle detection and termination selection.
//!
//! ```text
//! Pending ──(provider confirms)──► Running ◄──(busy again)── Idle
//!                                     └──(idle > timeout)──────┘
//! Pending | Running | Idle ──(selected)──► Terminating ──(confirmed)──► removed
//! ```
//!
//! Only workers move between `Running` and `Idle`. The head node is never
//! a termination candidate.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use fleet_core::{EpochSecs, LoadSample, NodeId, NodeRecord, NodeState};
use tracing::debug;

/// A state change applied by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub node_id: NodeId,
    pub from: NodeState,
    pub to: NodeState,
}

#[derive(Debug, Clone)]
pub struct NodeLifecycleTracker {
    idle_timeout: Duration,
}

impl NodeLifecycleTracker {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { idle_timeout }
    }

    /// Advance `last_busy_at` for every node whose latest sample is busy.
    pub fn record_load(
        &self,
        nodes: &mut BTreeMap<NodeId, NodeRecord>,
        samples: &HashMap<NodeId, LoadSample>,
    ) {
        for (id, node) in nodes.iter_mut() {
            if let Some(sample) = samples.get(id)
                && sample.is_busy()
                && sample.reported_at > node.last_busy_at
            {
                node.last_busy_at = sample.reported_at;
            }
        }
    }

    /// Move workers between `Running` and `Idle` according to how long they
    /// have gone without load.
    pub fn refresh(
        &self,
        nodes: &mut BTreeMap<NodeId, NodeRecord>,
        now: EpochSecs,
    ) -> Vec<Transition> {
        let timeout = self.idle_timeout.as_secs();
        let mut transitions = Vec::new();
        for node in nodes.values_mut().filter(|n| n.is_worker()) {
            let idle_for = node.idle_secs(now);
            let next = match node.state {
                NodeState::Running if idle_for > timeout => NodeState::Idle,
                NodeState::Idle if idle_for <= timeout => NodeState::Running,
                _ => continue,
            };
            debug!(node_id = %node.id, from = %node.state, to = %next, idle_for, "node lifecycle transition");
            transitions.push(Transition {
                node_id: node.id.clone(),
                from: node.state,
                to: next,
            });
            node.state = next;
        }
        transitions
    }

    /// Whether a worker has been idle long enough to be terminated.
    pub fn is_eligible(&self, node: &NodeRecord, now: EpochSecs) -> bool {
        node.is_worker()
            && node.state.is_live()
            && node.idle_secs(now) >= self.idle_timeout.as_secs()
    }

    pub fn eligible_count<'a>(
        &self,
        nodes: impl IntoIterator<Item = &'a NodeRecord>,
        now: EpochSecs,
    ) -> u32 {
        nodes
            .into_iter()
            .filter(|n| self.is_eligible(n, now))
            .count() as u32
    }

    /// Pick workers to terminate.
    ///
    /// Candidates are live workers ordered by longest idle, oldest launch
    /// first on ties. Up to `excess` idle-eligible workers are chosen; if
    /// `forced` (workers above the hard cap) is larger, the least recently
    /// busy workers are taken regardless of the idle timeout.
    pub fn select_for_termination<'a>(
        &self,
        nodes: impl IntoIterator<Item = &'a NodeRecord>,
        excess: u32,
        forced: u32,
        now: EpochSecs,
    ) -> Vec<NodeId> {
        let mut candidates: Vec<&NodeRecord> = nodes
            .into_iter()
            .filter(|n| n.is_worker() && n.state.is_live())
            .collect();
        candidates.sort_by(|a, b| {
            a.last_busy_at
                .cmp(&b.last_busy_at)
                .then(a.launched_at.cmp(&b.launched_at))
                .then(a.id.cmp(&b.id))
        });

        let eligible = candidates
            .iter()
            .filter(|n| self.is_eligible(n, now))
            .count() as u32;
        let count = forced.max(excess.min(eligible)) as usize;

        candidates
            .into_iter()
            .take(count)
            .map(|n| n.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::NodeRole;

    const NOW: EpochSecs = 10_000;

    fn worker(id: &str, idle_mins: u64, launched_at: EpochSecs) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            role: NodeRole::Worker,
            state: NodeState::Running,
            last_busy_at: NOW - idle_mins * 60,
            launched_at,
            external: false,
        }
    }

    fn tracker() -> NodeLifecycleTracker {
        NodeLifecycleTracker::new(Duration::from_secs(5 * 60))
    }

    #[test]
    fn only_timed_out_node_selected() {
        // 5 workers, A idle 10m, B idle 2m, the rest busy, target 4.
        let nodes = [
            worker("A", 10, 1),
            worker("B", 2, 1),
            worker("C", 0, 1),
            worker("D", 0, 1),
            worker("E", 0, 1),
        ];
        let chosen = tracker().select_for_termination(&nodes, 1, 0, NOW);
        assert_eq!(chosen, vec!["A".to_string()]);

        // Asking for more does not reach into non-eligible nodes.
        let chosen = tracker().select_for_termination(&nodes, 3, 0, NOW);
        assert_eq!(chosen, vec!["A".to_string()]);
    }

    #[test]
    fn forced_shrink_ignores_timeout() {
        let nodes = [worker("A", 10, 1), worker("B", 2, 1), worker("C", 1, 1)];
        let chosen = tracker().select_for_termination(&nodes, 2, 2, NOW);
        assert_eq!(chosen, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn ties_broken_by_oldest_launch() {
        let nodes = [worker("young", 10, 500), worker("old", 10, 100)];
        let chosen = tracker().select_for_termination(&nodes, 1, 0, NOW);
        assert_eq!(chosen, vec!["old".to_string()]);
    }

    #[test]
    fn head_never_selected() {
        let mut head = worker("head", 60, 1);
        head.role = NodeRole::Head;
        let nodes = [head, worker("w", 0, 1)];
        let chosen = tracker().select_for_termination(&nodes, 2, 2, NOW);
        assert_eq!(chosen, vec!["w".to_string()]);
    }

    #[test]
    fn terminating_nodes_not_reselected() {
        let mut a = worker("A", 10, 1);
        a.state = NodeState::Terminating;
        let nodes = [a, worker("B", 10, 1)];
        let chosen = tracker().select_for_termination(&nodes, 2, 0, NOW);
        assert_eq!(chosen, vec!["B".to_string()]);
    }

    #[test]
    fn refresh_moves_between_running_and_idle() {
        let mut nodes = BTreeMap::new();
        nodes.insert("A".to_string(), worker("A", 10, 1));
        nodes.insert("B".to_string(), worker("B", 2, 1));
        let mut head = worker("H", 60, 1);
        head.role = NodeRole::Head;
        nodes.insert("H".to_string(), head);

        let transitions = tracker().refresh(&mut nodes, NOW);
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].node_id, "A");
        assert_eq!(nodes["A"].state, NodeState::Idle);
        assert_eq!(nodes["H"].state, NodeState::Running);

        // A becomes busy again.
        let mut samples = HashMap::new();
        samples.insert(
            "A".to_string(),
            LoadSample {
                load: 0.5,
                reported_at: NOW,
            },
        );
        tracker().record_load(&mut nodes, &samples);
        assert_eq!(nodes["A"].last_busy_at, NOW);
        let transitions = tracker().refresh(&mut nodes, NOW);
        assert_eq!(transitions[0].to, NodeState::Running);
    }

    #[test]
    fn idle_samples_do_not_refresh_busy_clock() {
        let mut nodes = BTreeMap::new();
        nodes.insert("A".to_string(), worker("A", 10, 1));
        let mut samples = HashMap::new();
        samples.insert(
            "A".to_string(),
            LoadSample {
                load: 0.0,
                reported_at: NOW,
            },
        );
        tracker().record_load(&mut nodes, &samples);
        assert_eq!(nodes["A"].idle_secs(NOW), 600);
    }

    #[test]
    fn eligibility_is_inclusive_of_timeout() {
        let node = worker("A", 5, 1);
        assert!(tracker().is_eligible(&node, NOW));
        assert_eq!(tracker().eligible_count([&node], NOW), 1);
    }
}
