//! fleet-core — cluster spec parsing, validation, and shared node types.
//!
//! The cluster spec file is parsed into a [`ClusterConfig`] DTO and then
//! validated into an immutable [`ClusterSpec`], which is what the rest of
//! FleetGrid consumes.

pub mod config;
pub mod error;
pub mod spec;
pub mod types;

pub use config::ClusterConfig;
pub use error::ValidationError;
pub use spec::{AutoscalerSettings, ClusterSpec, NodeTypeSpec};
pub use types::*;
