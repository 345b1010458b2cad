//! Provider call errors.

use std::time::Duration;

use fleet_core::NodeId;
use thiserror::Error;

use crate::client::ProviderAction;

/// Result type alias for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors a provider call can produce.
///
/// None of these are fatal to the control loop. `Provision` and `Timeout`
/// are corrected by the next observation; `PermissionDenied` is fatal for
/// that action only.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("{action} failed: {reason}")]
    Provision {
        action: ProviderAction,
        reason: String,
    },

    #[error("launch partially succeeded ({} of {requested}): {reason}", launched.len())]
    PartialLaunch {
        launched: Vec<NodeId>,
        requested: u32,
        reason: String,
    },

    #[error("{action} timed out after {elapsed:?}, outcome unknown")]
    Timeout {
        action: ProviderAction,
        elapsed: Duration,
    },

    #[error("permission denied: {iam_action} is not granted by the access policy")]
    PermissionDenied {
        action: ProviderAction,
        iam_action: String,
    },
}

impl ProviderError {
    /// The action this error belongs to.
    pub fn action(&self) -> ProviderAction {
        match self {
            ProviderError::Provision { action, .. }
            | ProviderError::Timeout { action, .. }
            | ProviderError::PermissionDenied { action, .. } => *action,
            ProviderError::PartialLaunch { .. } => ProviderAction::Launch,
        }
    }

    /// Whether the call may have taken effect despite the error.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. })
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, ProviderError::PermissionDenied { .. })
    }
}
