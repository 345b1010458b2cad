//! fleetgrid-state — embedded state store for the FleetGrid autoscaler.
//!
//! Backed by [redb](https://docs.rs/redb). Persists the reconciler's node
//! view and per-cluster bookkeeping so that a restarted daemon neither
//! re-runs a completed pre-start nor forgets nodes it was draining.
//!
//! # Architecture
//!
//! Values are JSON-serialized into redb's `&[u8]` columns. Node keys are
//! `{cluster}:{node_id}`, so one range scan returns a cluster's nodes.
//! Keys whose remainder still contains `:` belong to another cluster.
//!
//! `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::ClusterRecord;
