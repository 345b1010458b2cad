//! fleetgrid-provider — the cloud compute surface the autoscaler drives.
//!
//! # Architecture
//!
//! ```text
//! Reconciler
//!   └── PolicyGuard<P>            (fails fast on actions the policy lacks)
//!         └── P: ProviderClient   (list / launch / terminate / tag)
//! ```
//!
//! Every call is a network call in a real provider. Callers wrap them in a
//! timeout and treat expiry as an unknown outcome; the next `list_nodes`
//! is the authority on what actually happened.
//!
//! [`InMemoryProvider`] is a deterministic simulated cloud with fault
//! injection, used by the `local` provider type and by tests.

pub mod client;
pub mod error;
pub mod guard;
pub mod memory;
pub mod policy;

pub use client::{ProviderAction, ProviderClient, ProviderNode, ProviderNodeState, TerminateReport};
pub use error::{ProviderError, ProviderResult};
pub use guard::PolicyGuard;
pub use memory::InMemoryProvider;
pub use policy::{AccessPolicy, ActionPattern, PolicyError};
