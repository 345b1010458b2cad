//! fleetgrid-autoscale — utilization-driven worker reconciliation.
//!
//! Each cycle observes the provider, estimates how busy the live nodes
//! are, computes a target worker count, and issues the launches or
//! terminations that close the gap. Workers are only terminated after
//! they have been idle for the configured timeout, unless the cluster is
//! above `max_workers`.
//!
//! # Scaling Algorithm
//!
//! ```text
//! busy_fraction = busy live nodes / live nodes      (0 when empty)
//!
//! if mode == aggressive and initial_workers never reached:
//!     target = initial_workers
//! else:
//!     target = clamp(ceil(live_workers * busy_fraction / target_utilization),
//!                    min_workers, max_workers)
//!
//! target > live: launch (target - live) workers
//! target < live: terminate up to (live - target) workers idle >= idle_timeout,
//!                longest idle first; above max_workers the excess goes
//!                regardless of idle time
//! ```
//!
//! Provider failures never abort the loop. They are logged, counted per
//! action, and raised as an alert after `alert_after_failures` in a row.

pub mod escalation;
pub mod estimator;
pub mod lifecycle;
pub mod policy;
pub mod reconciler;
pub mod runner;
pub mod view;

pub use escalation::{Alert, FailureTracker};
pub use estimator::{LoadBoard, ResourceDemandEstimator};
pub use lifecycle::{NodeLifecycleTracker, Transition};
pub use policy::{TargetDecision, TargetInputs, TargetReason, compute_target, launch_limit};
pub use reconciler::{CycleReport, Reconciler};
pub use runner::{CycleOutcome, ReconcileLoop};
pub use view::ClusterView;
